//! # KeyVault KMS Engine
//!
//! Key lifecycle store: creates, versions, rotates and revokes keys, and
//! performs envelope encryption without releasing key material.
//!
//! ## Key hierarchy
//!
//! ```text
//! MasterKey ──wraps──▶ KEK (one per key version) ──wraps──▶ DEK (one per call)
//! ```
//!
//! Raw key material is generated once per version, wrapped under the
//! master key and only ever unwrapped transiently inside this engine.
//!
//! ## Invariants
//!
//! - A non-revoked key has exactly one `ACTIVE` version; a revoked key has none.
//! - Version numbers are dense and strictly increasing per key.
//!
//! Both are enforced by the schema (partial unique index, `UNIQUE(key_id,
//! version)`) and by serializing every version transition of a key behind
//! a per-key lock inside a single transaction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod model;

pub use error::KmsError;
pub use keyvault_crypto::KeyType;
pub use model::{
    EncryptedPayload, KeyPurpose, KeySpec, KeyStatus, KeyVersion, LogicalKey, VersionStatus,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use keyvault_crypto::{envelope, keygen, CryptoError, MasterKey};
use keyvault_storage::Param;
use keyvault_storage_sqlite::{SqliteBackend, SqliteTransaction};

// ============================================================================
// SQL Schema
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS keys (
    id          TEXT PRIMARY KEY,
    key_type    TEXT NOT NULL CHECK (key_type IN ('AES', 'RSA', 'ECC')),
    key_size    INTEGER NOT NULL,
    purpose     TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('ACTIVE', 'REVOKED')),
    created_at  INTEGER NOT NULL,
    revoked_at  INTEGER
);

CREATE TABLE IF NOT EXISTS key_versions (
    id              TEXT PRIMARY KEY,
    key_id          TEXT NOT NULL REFERENCES keys(id),
    version         INTEGER NOT NULL CHECK (version >= 1),
    encrypted_key   BLOB NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('ACTIVE', 'ROTATED', 'REVOKED')),
    created_at      INTEGER NOT NULL,
    UNIQUE (key_id, version)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_key_versions_one_active
    ON key_versions(key_id) WHERE status = 'ACTIVE';
"#;

const KEY_COLUMNS: &str = "id, key_type, key_size, purpose, status, created_at, revoked_at";

const VERSION_COLUMNS: &str = "id, key_id, version, encrypted_key, status, created_at";

type KeyRow = (String, String, i64, String, String, i64, Option<i64>);

type VersionRow = (String, String, i64, Vec<u8>, String, i64);

// ============================================================================
// Per-key locks
// ============================================================================

/// Registry of per-key async mutexes guarding version transitions.
///
/// An entry lives only while some task holds or waits for its lock.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key_id: &str) -> KeyLockGuard<'_> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key_id.to_string()).or_default().clone()
        };
        KeyLockGuard {
            locks: self,
            key_id: key_id.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    fn release(&self, key_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own handle left: nobody holds or awaits this lock.
        if map.get(key_id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(key_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct KeyLockGuard<'a> {
    locks: &'a KeyLocks,
    key_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key_id);
    }
}

// ============================================================================
// Key Store
// ============================================================================

/// The key lifecycle store.
///
/// Holds the master key for its whole lifetime; the master key is never
/// written to storage.
pub struct KeyStore {
    storage: SqliteBackend,
    master_key: MasterKey,
    locks: KeyLocks,
}

impl KeyStore {
    /// Creates a key store on top of an open backend, creating tables if needed.
    pub async fn new(storage: SqliteBackend, master_key: MasterKey) -> Result<Self, KmsError> {
        storage.execute_raw(SCHEMA).await?;

        info!("Key store initialized");

        Ok(Self {
            storage,
            master_key,
            locks: KeyLocks::default(),
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    fn envelope_aad(key_id: &str, version: u32) -> String {
        format!("keyvault-envelope:{key_id}:v{version}")
    }

    /// Unwraps a version's key material. The result is zeroized on drop.
    fn unwrap_kek(&self, version: &KeyVersion) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.master_key
            .unwrap_kek(&version.key_id, version.version, &version.encrypted_key)
            .map_err(|_| KmsError::UnwrapFailed {
                key_id: version.key_id.clone(),
                version: version.version,
            })
    }

    /// Generates key material off the async executor.
    async fn generate(key_type: KeyType, size: u32) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        tokio::task::spawn_blocking(move || keygen::generate_key_material(key_type, Some(size)))
            .await
            .map_err(|e| KmsError::Internal(format!("key generation task failed: {e}")))?
            .map_err(KmsError::from)
    }

    fn key_from_row(row: KeyRow) -> Result<LogicalKey, KmsError> {
        let (id, key_type, key_size, purpose, status, created_at, revoked_at) = row;
        Ok(LogicalKey {
            id,
            key_type: key_type
                .parse()
                .map_err(|e: CryptoError| KmsError::Internal(e.to_string()))?,
            key_size: u32::try_from(key_size)
                .map_err(|_| KmsError::Internal(format!("corrupt key size: {key_size}")))?,
            purpose: purpose.parse()?,
            status: status.parse()?,
            created_at: created_at as u64,
            revoked_at: revoked_at.map(|t| t as u64),
        })
    }

    fn version_from_row(row: VersionRow) -> Result<KeyVersion, KmsError> {
        let (id, key_id, version, encrypted_key, status, created_at) = row;
        Ok(KeyVersion {
            id,
            key_id,
            version: u32::try_from(version)
                .map_err(|_| KmsError::Internal(format!("corrupt version number: {version}")))?,
            encrypted_key,
            status: status.parse()?,
            created_at: created_at as u64,
        })
    }

    async fn active_version_in(
        tx: &mut SqliteTransaction,
        key_id: &str,
    ) -> Result<Option<KeyVersion>, KmsError> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM key_versions WHERE key_id = ? AND status = 'ACTIVE'"
        );
        tx.query_one::<VersionRow>(&sql, &[key_id.into()])
            .await?
            .map(Self::version_from_row)
            .transpose()
    }

    async fn key_status_in(
        tx: &mut SqliteTransaction,
        key_id: &str,
    ) -> Result<Option<KeyStatus>, KmsError> {
        tx.query_one::<(String,)>("SELECT status FROM keys WHERE id = ?", &[key_id.into()])
            .await?
            .map(|(status,)| status.parse())
            .transpose()
    }

    // ========================================================================
    // Key Management Operations
    // ========================================================================

    /// Creates a key and its first version.
    ///
    /// Material is generated, wrapped under the master key, and persisted
    /// together with the key row in one transaction: a failure leaves no
    /// partial key or version behind.
    pub async fn create_key(&self, spec: KeySpec) -> Result<LogicalKey, KmsError> {
        let key_size = spec.key_type.resolve_size(spec.size)?;
        let material = Self::generate(spec.key_type, key_size).await?;

        let key_id = format!("key_{}", Uuid::new_v4().simple());
        let version_id = format!("ver_{}", Uuid::new_v4().simple());
        let encrypted_key = self.master_key.wrap_kek(&key_id, 1, &material)?;
        drop(material);

        let now = Self::now();

        let mut tx = self.storage.begin().await?;

        tx.execute(
            "INSERT INTO keys (id, key_type, key_size, purpose, status, created_at) VALUES (?, ?, ?, ?, 'ACTIVE', ?)",
            &[
                key_id.as_str().into(),
                spec.key_type.as_str().into(),
                key_size.into(),
                spec.purpose.as_str().into(),
                now.into(),
            ],
        )
        .await?;

        tx.execute(
            "INSERT INTO key_versions (id, key_id, version, encrypted_key, status, created_at) VALUES (?, ?, 1, ?, 'ACTIVE', ?)",
            &[
                version_id.as_str().into(),
                key_id.as_str().into(),
                encrypted_key.as_slice().into(),
                now.into(),
            ],
        )
        .await?;

        tx.commit().await?;

        info!(
            key_id = %key_id,
            key_type = %spec.key_type,
            size = key_size,
            purpose = %spec.purpose,
            "Key created"
        );

        Ok(LogicalKey {
            id: key_id,
            key_type: spec.key_type,
            key_size,
            purpose: spec.purpose,
            status: KeyStatus::Active,
            created_at: now as u64,
            revoked_at: None,
        })
    }

    /// Gets metadata for a key.
    pub async fn get_key(&self, key_id: &str) -> Result<LogicalKey, KmsError> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE id = ?");
        let row = self
            .storage
            .query_one::<KeyRow>(&sql, &[key_id.into()])
            .await?
            .ok_or_else(|| KmsError::KeyNotFound(key_id.to_string()))?;

        Self::key_from_row(row)
    }

    /// Returns the version currently `ACTIVE` for an `ACTIVE` key.
    pub async fn get_active_version(&self, key_id: &str) -> Result<KeyVersion, KmsError> {
        let sql = format!(
            "SELECT v.id, v.key_id, v.version, v.encrypted_key, v.status, v.created_at \
             FROM key_versions v JOIN keys k ON k.id = v.key_id \
             WHERE v.key_id = ? AND v.status = 'ACTIVE' AND k.status = 'ACTIVE'"
        );

        match self
            .storage
            .query_one::<VersionRow>(&sql, &[key_id.into()])
            .await?
        {
            Some(row) => Self::version_from_row(row),
            None => {
                // Distinguish an unknown key from one without an active version.
                self.get_key(key_id).await?;
                Err(KmsError::NoActiveVersion(key_id.to_string()))
            }
        }
    }

    /// Point lookup of a version by number, regardless of its status.
    pub async fn get_version(&self, key_id: &str, version: u32) -> Result<KeyVersion, KmsError> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM key_versions WHERE key_id = ? AND version = ?");

        match self
            .storage
            .query_one::<VersionRow>(&sql, &[key_id.into(), version.into()])
            .await?
        {
            Some(row) => Self::version_from_row(row),
            None => {
                self.get_key(key_id).await?;
                Err(KmsError::VersionNotFound {
                    key_id: key_id.to_string(),
                    version,
                })
            }
        }
    }

    /// Lists all versions of a key, oldest first.
    pub async fn list_versions(&self, key_id: &str) -> Result<Vec<KeyVersion>, KmsError> {
        self.get_key(key_id).await?;

        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM key_versions WHERE key_id = ? ORDER BY version ASC"
        );
        self.storage
            .query_all::<VersionRow>(&sql, &[key_id.into()])
            .await?
            .into_iter()
            .map(Self::version_from_row)
            .collect()
    }

    /// Rotates a key to a new version.
    ///
    /// New material is generated before any lock is taken. The old
    /// `ACTIVE` version is then compare-and-swapped to `ROTATED` and the
    /// new version inserted as `ACTIVE`, in one transaction under the
    /// key's lock, so no reader ever sees zero or two active versions.
    ///
    /// Returns the new version number.
    pub async fn rotate_key(&self, key_id: &str) -> Result<u32, KmsError> {
        let key = self.get_key(key_id).await?;
        if key.status == KeyStatus::Revoked {
            return Err(KmsError::NoActiveVersion(key_id.to_string()));
        }

        let material = Self::generate(key.key_type, key.key_size).await?;

        let _guard = self.locks.lock(key_id).await;

        let mut tx = self.storage.begin().await?;

        if Self::key_status_in(&mut tx, key_id).await? != Some(KeyStatus::Active) {
            return Err(KmsError::NoActiveVersion(key_id.to_string()));
        }

        let current = Self::active_version_in(&mut tx, key_id)
            .await?
            .ok_or_else(|| KmsError::NoActiveVersion(key_id.to_string()))?;

        let new_version = current.version + 1;
        let encrypted_key = self.master_key.wrap_kek(key_id, new_version, &material)?;
        drop(material);

        let swapped = tx
            .execute(
                "UPDATE key_versions SET status = 'ROTATED' WHERE key_id = ? AND version = ? AND status = 'ACTIVE'",
                &[key_id.into(), current.version.into()],
            )
            .await?;

        if swapped != 1 {
            warn!(key_id = %key_id, version = current.version, "Active version changed during rotation");
            return Err(KmsError::ConcurrentModification(key_id.to_string()));
        }

        let version_id = format!("ver_{}", Uuid::new_v4().simple());
        tx.execute(
            "INSERT INTO key_versions (id, key_id, version, encrypted_key, status, created_at) VALUES (?, ?, ?, ?, 'ACTIVE', ?)",
            &[
                version_id.as_str().into(),
                key_id.into(),
                new_version.into(),
                encrypted_key.as_slice().into(),
                Self::now().into(),
            ],
        )
        .await?;

        tx.commit().await?;

        info!(key_id = %key_id, version = new_version, "Key rotated");

        Ok(new_version)
    }

    /// Revokes a key. Irreversible.
    ///
    /// The active version is demoted to `ROTATED` in the same transaction,
    /// so historical versions stay decryptable while no version remains
    /// active. Fails with [`KmsError::KeyNotFound`] if the key is absent or
    /// already revoked.
    pub async fn revoke_key(&self, key_id: &str) -> Result<(), KmsError> {
        let _guard = self.locks.lock(key_id).await;

        let mut tx = self.storage.begin().await?;

        let revoked = tx
            .execute(
                "UPDATE keys SET status = 'REVOKED', revoked_at = ? WHERE id = ? AND status = 'ACTIVE'",
                &[Self::now().into(), key_id.into()],
            )
            .await?;

        if revoked != 1 {
            return Err(KmsError::KeyNotFound(key_id.to_string()));
        }

        tx.execute(
            "UPDATE key_versions SET status = 'ROTATED' WHERE key_id = ? AND status = 'ACTIVE'",
            &[key_id.into()],
        )
        .await?;

        tx.commit().await?;

        warn!(key_id = %key_id, "Key revoked");

        Ok(())
    }

    /// Revokes a single historical version.
    ///
    /// The active version of a live key cannot be revoked on its own;
    /// rotate first.
    pub async fn revoke_version(&self, key_id: &str, version: u32) -> Result<(), KmsError> {
        let _guard = self.locks.lock(key_id).await;

        let mut tx = self.storage.begin().await?;

        if Self::key_status_in(&mut tx, key_id).await?.is_none() {
            return Err(KmsError::KeyNotFound(key_id.to_string()));
        }

        let status = tx
            .query_one::<(String,)>(
                "SELECT status FROM key_versions WHERE key_id = ? AND version = ?",
                &[key_id.into(), version.into()],
            )
            .await?
            .map(|(status,)| status.parse::<VersionStatus>())
            .transpose()?
            .ok_or_else(|| KmsError::VersionNotFound {
                key_id: key_id.to_string(),
                version,
            })?;

        match status {
            VersionStatus::Active => {
                return Err(KmsError::VersionActive {
                    key_id: key_id.to_string(),
                    version,
                })
            }
            VersionStatus::Revoked => {
                return Err(KmsError::VersionRevoked {
                    key_id: key_id.to_string(),
                    version,
                })
            }
            VersionStatus::Rotated => {}
        }

        tx.execute(
            "UPDATE key_versions SET status = 'REVOKED' WHERE key_id = ? AND version = ? AND status = 'ROTATED'",
            &[key_id.into(), version.into()],
        )
        .await?;

        tx.commit().await?;

        warn!(key_id = %key_id, version = version, "Key version revoked");

        Ok(())
    }

    // ========================================================================
    // Encryption/Decryption Operations
    // ========================================================================

    fn require_symmetric(key: &LogicalKey, operation: &str) -> Result<(), KmsError> {
        if key.key_type.is_symmetric() {
            Ok(())
        } else {
            Err(KmsError::OperationNotAllowed {
                operation: operation.to_string(),
                key_type: key.key_type.to_string(),
            })
        }
    }

    /// Envelope-encrypts `plaintext` under the key's active version.
    pub async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, KmsError> {
        let key = self.get_key(key_id).await?;

        if key.status == KeyStatus::Revoked {
            return Err(KmsError::KeyRevoked(key_id.to_string()));
        }
        if key.purpose != KeyPurpose::Encrypt {
            return Err(KmsError::PurposeMismatch {
                key_id: key_id.to_string(),
                purpose: key.purpose.to_string(),
            });
        }
        Self::require_symmetric(&key, "encrypt")?;

        let version = self.get_active_version(key_id).await?;
        let kek = self.unwrap_kek(&version)?;
        let aad = Self::envelope_aad(key_id, version.version);

        let sealed = envelope::encrypt(plaintext, &kek, Some(aad.as_bytes()))?;

        debug!(key_id = %key_id, version = version.version, "Payload encrypted");

        Ok(EncryptedPayload {
            ciphertext: sealed.ciphertext,
            encrypted_dek: sealed.encrypted_dek,
            key_version: version.version,
        })
    }

    /// Decrypts an envelope produced under `version` of the key.
    ///
    /// Any non-revoked version can be used, including versions of a
    /// revoked key.
    pub async fn decrypt(
        &self,
        key_id: &str,
        version: u32,
        ciphertext: &[u8],
        encrypted_dek: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let key = self.get_key(key_id).await?;
        Self::require_symmetric(&key, "decrypt")?;

        let key_version = self.get_version(key_id, version).await?;
        if key_version.status == VersionStatus::Revoked {
            return Err(KmsError::VersionRevoked {
                key_id: key_id.to_string(),
                version,
            });
        }

        let kek = self.unwrap_kek(&key_version)?;
        let aad = Self::envelope_aad(key_id, version);

        let plaintext = envelope::decrypt(ciphertext, encrypted_dek, &kek, Some(aad.as_bytes()))
            .map_err(|e| match e {
                CryptoError::AuthenticationFailed => KmsError::DecryptionFailed,
                other => KmsError::Crypto(other),
            })?;

        debug!(key_id = %key_id, version = version, "Payload decrypted");

        Ok(plaintext)
    }
}

// ============================================================================
// Tests
// ============================================================================
