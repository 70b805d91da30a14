//! # KeyVault API
//!
//! The operations KeyVault exposes to client services, independent of
//! any transport.
//!
//! Every operation follows the same sequence:
//!
//! 1. authorize the principal's role for the action
//! 2. validate input
//! 3. execute against the key store or audit ledger
//! 4. append exactly one audit entry, `SUCCESS` or `FAILURE`
//! 5. return
//!
//! An operation whose audit entry cannot be written fails with
//! [`ApiError::Internal`], whatever its own outcome was.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

pub use error::ApiError;

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use keyvault_audit::{AuditLedger, AuditLogEntry, AuditRecord, AuditResult, ChainStatus};
use keyvault_auth::{AccessPolicy, Action, IdentityBackend, Principal, ServiceDirectory};
use keyvault_crypto::{KeyType, MasterKey};
use keyvault_kms::{KeyPurpose, KeySpec, KeyStore};
use keyvault_storage_sqlite::SqliteBackend;

pub use keyvault_audit::DEFAULT_FETCH_LIMIT;

/// Name of the database file inside the data directory.
pub const DATABASE_NAME: &str = "keyvault";

/// Result of [`KeyVault::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResponse {
    /// Base64 payload ciphertext.
    pub ciphertext: String,
    /// Base64 wrapped data key.
    pub encrypted_dek: String,
    /// Version of the key that wrapped the data key.
    pub key_version: u32,
}

/// The KeyVault service.
pub struct KeyVault {
    store: KeyStore,
    ledger: AuditLedger,
    directory: ServiceDirectory,
    policy: AccessPolicy,
}

impl KeyVault {
    /// Opens (or creates) a vault in `data_dir`.
    pub async fn open(data_dir: impl AsRef<Path>, master_key: MasterKey) -> Result<Self, ApiError> {
        let storage = SqliteBackend::open(data_dir, DATABASE_NAME).await?;

        let store = KeyStore::new(storage.clone(), master_key).await?;
        let ledger = AuditLedger::new(storage.clone()).await?;
        let directory = ServiceDirectory::new(storage).await?;

        info!("KeyVault opened");

        Ok(Self {
            store,
            ledger,
            directory,
            policy: AccessPolicy,
        })
    }

    /// The service identity directory.
    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    /// Resolves a service id to a principal.
    pub async fn authenticate(&self, service_id: &str) -> Result<Principal, ApiError> {
        self.directory.resolve(service_id).await.map_err(|e| {
            warn!(service_id = %service_id, backend = self.directory.name(), "Unknown service identity");
            e.into()
        })
    }

    // ========================================================================
    // Audit plumbing
    // ========================================================================

    fn authorize(&self, principal: &Principal, action: Action) -> Result<(), ApiError> {
        self.policy.authorize(&principal.role, action).map_err(|e| {
            warn!(service_id = %principal.id, role = %principal.role, action = %action, "Permission denied");
            e.into()
        })
    }

    /// Appends the audit entry for `outcome` and passes `outcome` through.
    async fn finish<T>(
        &self,
        principal: &Principal,
        action: Action,
        key_id: Option<&str>,
        key_version: Option<u32>,
        outcome: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let result = if outcome.is_ok() {
            AuditResult::Success
        } else {
            AuditResult::Failure
        };

        let record = AuditRecord {
            service_id: principal.id.clone(),
            action: action.as_str().to_string(),
            key_id: key_id.map(str::to_string),
            key_version,
            result,
        };

        if let Err(e) = self.ledger.append(record).await {
            error!(service_id = %principal.id, action = %action, error = %e, "Audit append failed");
            return Err(ApiError::Internal(format!("audit log unavailable: {e}")));
        }

        outcome
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Creates a key and returns its id.
    ///
    /// `size` is required for `AES` (128 or 256) and ignored otherwise.
    pub async fn create_key(
        &self,
        principal: &Principal,
        key_type: &str,
        purpose: &str,
        size: Option<u32>,
    ) -> Result<String, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::KeyCreate)?;

            let key_type: KeyType = key_type.parse()?;
            let purpose: KeyPurpose = purpose.parse()?;
            let size = if key_type.is_symmetric() { size } else { None };

            let key = self
                .store
                .create_key(KeySpec {
                    key_type,
                    purpose,
                    size,
                })
                .await?;
            Ok::<_, ApiError>(key.id)
        }
        .await;

        let key_id = outcome.as_ref().ok().cloned();
        let version = key_id.as_ref().map(|_| 1);
        self.finish(principal, Action::KeyCreate, key_id.as_deref(), version, outcome)
            .await
    }

    /// Envelope-encrypts `plaintext` under the key's active version.
    pub async fn encrypt(
        &self,
        principal: &Principal,
        key_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptResponse, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::Encrypt)?;

            let payload = self.store.encrypt(key_id, plaintext).await?;
            Ok::<_, ApiError>(EncryptResponse {
                ciphertext: STANDARD.encode(&payload.ciphertext),
                encrypted_dek: STANDARD.encode(&payload.encrypted_dek),
                key_version: payload.key_version,
            })
        }
        .await;

        let version = outcome.as_ref().ok().map(|r| r.key_version);
        self.finish(principal, Action::Encrypt, Some(key_id), version, outcome)
            .await
    }

    /// Decrypts base64 `ciphertext`/`encrypted_dek` produced under `key_version`.
    pub async fn decrypt(
        &self,
        principal: &Principal,
        key_id: &str,
        key_version: u32,
        ciphertext: &str,
        encrypted_dek: &str,
    ) -> Result<Zeroizing<Vec<u8>>, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::Decrypt)?;

            let ciphertext = decode_base64("ciphertext", ciphertext)?;
            let encrypted_dek = decode_base64("encrypted_dek", encrypted_dek)?;

            Ok::<_, ApiError>(self
                .store
                .decrypt(key_id, key_version, &ciphertext, &encrypted_dek)
                .await?)
        }
        .await;

        self.finish(principal, Action::Decrypt, Some(key_id), Some(key_version), outcome)
            .await
    }

    /// Rotates a key and returns the new version number.
    pub async fn rotate_key(&self, principal: &Principal, key_id: &str) -> Result<u32, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::KeyRotate)?;
            Ok::<_, ApiError>(self.store.rotate_key(key_id).await?)
        }
        .await;

        let version = outcome.as_ref().ok().copied();
        self.finish(principal, Action::KeyRotate, Some(key_id), version, outcome)
            .await
    }

    /// Revokes a key. Irreversible.
    pub async fn revoke_key(&self, principal: &Principal, key_id: &str) -> Result<(), ApiError> {
        let outcome = async {
            self.authorize(principal, Action::KeyRevoke)?;
            Ok::<_, ApiError>(self.store.revoke_key(key_id).await?)
        }
        .await;

        self.finish(principal, Action::KeyRevoke, Some(key_id), None, outcome)
            .await
    }

    /// Revokes one non-active version of a key.
    pub async fn revoke_key_version(
        &self,
        principal: &Principal,
        key_id: &str,
        key_version: u32,
    ) -> Result<(), ApiError> {
        let outcome = async {
            self.authorize(principal, Action::KeyRevoke)?;
            Ok::<_, ApiError>(self.store.revoke_version(key_id, key_version).await?)
        }
        .await;

        self.finish(principal, Action::KeyRevoke, Some(key_id), Some(key_version), outcome)
            .await
    }

    /// Returns audit entries, most recent first (default [`DEFAULT_FETCH_LIMIT`]).
    ///
    /// The entry recording this read is appended after the fetch and is not
    /// part of the result.
    pub async fn read_audit_log(
        &self,
        principal: &Principal,
        limit: Option<usize>,
    ) -> Result<Vec<AuditLogEntry>, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::AuditRead)?;
            Ok::<_, ApiError>(self
                .ledger
                .fetch(limit.unwrap_or(DEFAULT_FETCH_LIMIT))
                .await?)
        }
        .await;

        self.finish(principal, Action::AuditRead, None, None, outcome)
            .await
    }

    /// Recomputes the whole audit chain.
    ///
    /// A broken chain is a successful verification with a
    /// [`ChainStatus::Broken`] result.
    pub async fn verify_audit_log(&self, principal: &Principal) -> Result<ChainStatus, ApiError> {
        let outcome = async {
            self.authorize(principal, Action::AuditRead)?;
            Ok::<_, ApiError>(self.ledger.verify_ledger().await?)
        }
        .await;

        self.finish(principal, Action::AuditRead, None, None, outcome)
            .await
    }

    /// Verifies the audit chain without an acting principal (startup check).
    pub async fn check_audit_chain(&self) -> Result<ChainStatus, ApiError> {
        Ok(self.ledger.verify_ledger().await?)
    }
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(value)
        .map_err(|e| ApiError::Validation(format!("{field} is not valid base64: {e}")))
}
