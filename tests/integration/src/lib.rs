//! Integration tests for KeyVault.
//!
//! These tests drive the full stack through [`keyvault_api::KeyVault`] and
//! smoke-test the server binary over HTTP.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use tempfile::TempDir;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
}

// ============================================================================
// Test Server
// ============================================================================

/// A test server instance that manages its own data directory and process.
pub struct TestServer {
    process: Child,
    pub base_url: String,
    pub port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Start a new test server from `binary` on the specified port.
    pub async fn start(binary: &Path, port: u16, environment: &str) -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;

        let process = Command::new(binary)
            .env("KEYVAULT_MASTER_KEY", STANDARD.encode([0x42u8; 32]))
            .env("ENV", environment)
            .arg("--data-dir")
            .arg(data_dir.path())
            .arg("--bind")
            .arg(format!("127.0.0.1:{}", port))
            .arg("--seed-auditor")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start server: {:?}", binary))?;

        let base_url = format!("http://127.0.0.1:{}", port);

        let server = Self {
            process,
            base_url,
            port,
            _data_dir: data_dir,
        };

        // Wait for server to be ready
        server.wait_for_ready().await?;

        Ok(server)
    }

    /// Wait for the server to be ready to accept connections.
    async fn wait_for_ready(&self) -> Result<()> {
        let client = Client::new();
        let url = format!("{}/health", self.base_url);

        for _ in 0..50 {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }

        bail!("Server failed to start within 5 seconds")
    }

    /// Fetch the health endpoint.
    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = Client::new()
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Health check failed: {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Find the server binary in the target directory.
pub fn find_server_binary() -> Option<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());

    // Try debug build first, then release
    let candidates = [
        Path::new(&manifest_dir).join("../../target/debug/keyvault-server"),
        Path::new(&manifest_dir).join("../../target/debug/keyvault-server.exe"),
        Path::new(&manifest_dir).join("../../target/release/keyvault-server"),
        Path::new(&manifest_dir).join("../../target/release/keyvault-server.exe"),
    ];

    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .and_then(|candidate| candidate.canonicalize().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::Arc;

    use keyvault_api::{ApiError, KeyVault, DATABASE_NAME};
    use keyvault_audit::{AuditResult, BreakReason, ChainStatus};
    use keyvault_auth::Principal;
    use keyvault_crypto::MasterKey;
    use keyvault_storage_sqlite::SqliteBackend;

    // Port counter to avoid conflicts between parallel tests
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18200);

    fn next_port() -> u16 {
        PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    fn master_key() -> MasterKey {
        MasterKey::from_bytes(&[0x42; 32]).unwrap()
    }

    async fn open_vault() -> (TempDir, KeyVault) {
        let tmp = TempDir::new().unwrap();
        let vault = KeyVault::open(tmp.path(), master_key()).await.unwrap();
        (tmp, vault)
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_ciphertexts_readable() {
        let (_tmp, vault) = open_vault().await;
        let svc = Principal::service("svc-payments");

        let k1 = vault.create_key(&svc, "AES", "ENCRYPT", Some(256)).await.unwrap();
        let c1 = vault.encrypt(&svc, &k1, b"hello").await.unwrap();
        assert_eq!(c1.key_version, 1);

        assert_eq!(vault.rotate_key(&svc, &k1).await.unwrap(), 2);

        let plaintext = vault
            .decrypt(&svc, &k1, 1, &c1.ciphertext, &c1.encrypted_dek)
            .await
            .unwrap();
        assert_eq!(&*plaintext, b"hello");

        let c2 = vault.encrypt(&svc, &k1, b"hi").await.unwrap();
        assert_eq!(c2.key_version, 2);
    }

    #[tokio::test]
    async fn test_revocation_blocks_encrypt_not_decrypt() {
        let (_tmp, vault) = open_vault().await;
        let admin = Principal::admin("svc-admin");

        let k1 = vault.create_key(&admin, "AES", "ENCRYPT", Some(256)).await.unwrap();
        let c1 = vault.encrypt(&admin, &k1, b"hello").await.unwrap();

        vault.revoke_key(&admin, &k1).await.unwrap();

        assert!(matches!(
            vault.encrypt(&admin, &k1, b"again").await,
            Err(ApiError::StateConflict(_))
        ));
        assert!(matches!(
            vault.rotate_key(&admin, &k1).await,
            Err(ApiError::StateConflict(_))
        ));

        let plaintext = vault
            .decrypt(&admin, &k1, 1, &c1.ciphertext, &c1.encrypted_dek)
            .await
            .unwrap();
        assert_eq!(&*plaintext, b"hello");

        vault.revoke_key_version(&admin, &k1, 1).await.unwrap();
        assert!(matches!(
            vault
                .decrypt(&admin, &k1, 1, &c1.ciphertext, &c1.encrypted_dek)
                .await,
            Err(ApiError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_auditor_cannot_create_keys() {
        let (_tmp, vault) = open_vault().await;

        let denied = vault
            .create_key(&Principal::auditor("svc-auditor"), "AES", "ENCRYPT", Some(256))
            .await;
        assert!(matches!(denied, Err(ApiError::PermissionDenied(_))));

        vault
            .create_key(&Principal::admin("svc-admin"), "AES", "ENCRYPT", Some(256))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tampered_envelope_fails_uniformly() {
        let (_tmp, vault) = open_vault().await;
        let svc = Principal::service("svc-app");

        let key = vault.create_key(&svc, "AES", "ENCRYPT", Some(256)).await.unwrap();
        let sealed = vault.encrypt(&svc, &key, b"attack at dawn").await.unwrap();

        let flip = |b64: &str, byte: usize| {
            let mut raw = STANDARD.decode(b64).unwrap();
            raw[byte] ^= 0x01;
            STANDARD.encode(raw)
        };

        let bad_payload = vault
            .decrypt(&svc, &key, 1, &flip(&sealed.ciphertext, 20), &sealed.encrypted_dek)
            .await
            .unwrap_err();
        let bad_dek = vault
            .decrypt(&svc, &key, 1, &sealed.ciphertext, &flip(&sealed.encrypted_dek, 20))
            .await
            .unwrap_err();

        assert!(matches!(bad_payload, ApiError::AuthenticationFailure));
        assert!(matches!(bad_dek, ApiError::AuthenticationFailure));
        assert_eq!(bad_payload.to_string(), bad_dek.to_string());
    }

    #[tokio::test]
    async fn test_every_operation_is_audited_once() {
        let (_tmp, vault) = open_vault().await;
        let admin = Principal::admin("svc-admin");
        let svc = Principal::service("svc-app");
        let auditor = Principal::auditor("svc-auditor");

        let key = vault.create_key(&admin, "AES", "ENCRYPT", Some(128)).await.unwrap();
        let sealed = vault.encrypt(&svc, &key, b"x").await.unwrap();
        vault
            .decrypt(&svc, &key, 1, &sealed.ciphertext, &sealed.encrypted_dek)
            .await
            .unwrap();
        vault.rotate_key(&svc, &key).await.unwrap();
        let _ = vault.revoke_key(&svc, &key).await;
        vault.revoke_key(&admin, &key).await.unwrap();

        let entries = vault.read_audit_log(&auditor, None).await.unwrap();
        let summary: Vec<_> = entries
            .iter()
            .rev()
            .map(|e| (e.service_id.as_str(), e.action.as_str(), e.result))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("svc-admin", "key_create", AuditResult::Success),
                ("svc-app", "encrypt", AuditResult::Success),
                ("svc-app", "decrypt", AuditResult::Success),
                ("svc-app", "key_rotate", AuditResult::Success),
                ("svc-app", "key_revoke", AuditResult::Failure),
                ("svc-admin", "key_revoke", AuditResult::Success),
            ]
        );
        assert_eq!(entries[0].key_id.as_deref(), Some(key.as_str()));
        assert_eq!(entries[2].key_version, Some(2));

        assert_eq!(vault.verify_audit_log(&auditor).await.unwrap(), ChainStatus::Valid);
    }

    #[tokio::test]
    async fn test_audit_tampering_is_detected() {
        let (tmp, vault) = open_vault().await;
        let admin = Principal::admin("svc-admin");

        let key = vault.create_key(&admin, "AES", "ENCRYPT", Some(256)).await.unwrap();
        for _ in 0..4 {
            vault.encrypt(&admin, &key, b"payload").await.unwrap();
        }

        let storage = SqliteBackend::open(tmp.path(), DATABASE_NAME).await.unwrap();
        let ids = storage
            .query_all::<(i64,)>("SELECT id FROM audit_logs ORDER BY id ASC", &[])
            .await
            .unwrap();
        storage
            .execute(
                "UPDATE audit_logs SET result = 'FAILURE' WHERE id = ?",
                &[ids[2].0.into()],
            )
            .await
            .unwrap();

        assert_eq!(
            vault.check_audit_chain().await.unwrap(),
            ChainStatus::Broken {
                index: 2,
                sequence: ids[2].0,
                reason: BreakReason::HashMismatch,
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotations_and_encryptions() {
        let (_tmp, vault) = open_vault().await;
        let vault = Arc::new(vault);
        let svc = Principal::service("svc-app");

        let key = vault.create_key(&svc, "AES", "ENCRYPT", Some(256)).await.unwrap();

        let mut rotations = Vec::new();
        let mut encryptions = Vec::new();
        for _ in 0..6 {
            {
                let (vault, svc, key) = (Arc::clone(&vault), svc.clone(), key.clone());
                rotations.push(tokio::spawn(async move { vault.rotate_key(&svc, &key).await }));
            }

            {
                let (vault, svc, key) = (Arc::clone(&vault), svc.clone(), key.clone());
                encryptions.push(tokio::spawn(async move {
                    vault.encrypt(&svc, &key, b"during rotation").await
                }));
            }
        }

        let mut versions = Vec::new();
        for handle in rotations {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (2..=7).collect::<Vec<u32>>());

        for handle in encryptions {
            let sealed = handle.await.unwrap().unwrap();
            let plaintext = vault
                .decrypt(&svc, &key, sealed.key_version, &sealed.ciphertext, &sealed.encrypted_dek)
                .await
                .unwrap();
            assert_eq!(&*plaintext, b"during rotation");
        }

        let latest = vault.encrypt(&svc, &key, b"after").await.unwrap();
        assert_eq!(latest.key_version, 7);

        assert_eq!(vault.check_audit_chain().await.unwrap(), ChainStatus::Valid);
    }

    #[tokio::test]
    async fn test_reopen_requires_same_master_key() {
        let tmp = TempDir::new().unwrap();
        let svc = Principal::service("svc-app");

        let (key, sealed) = {
            let vault = KeyVault::open(tmp.path(), master_key()).await.unwrap();
            let key = vault.create_key(&svc, "AES", "ENCRYPT", Some(256)).await.unwrap();
            let sealed = vault.encrypt(&svc, &key, b"persisted").await.unwrap();
            (key, sealed)
        };

        let vault = KeyVault::open(tmp.path(), master_key()).await.unwrap();
        let plaintext = vault
            .decrypt(&svc, &key, 1, &sealed.ciphertext, &sealed.encrypted_dek)
            .await
            .unwrap();
        assert_eq!(&*plaintext, b"persisted");
        drop(vault);

        let vault = KeyVault::open(tmp.path(), MasterKey::generate()).await.unwrap();
        let result = vault
            .decrypt(&svc, &key, 1, &sealed.ciphertext, &sealed.encrypted_dek)
            .await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn test_server_health() {
        let Some(binary) = find_server_binary() else {
            eprintln!("keyvault-server binary not built; skipping");
            return;
        };

        let server = TestServer::start(&binary, next_port(), "staging").await.unwrap();
        let health = server.health().await.unwrap();

        assert_eq!(health.status, "ok");
        assert_eq!(health.environment, "staging");
    }

    #[tokio::test]
    async fn test_server_rejects_bad_master_key() {
        let Some(binary) = find_server_binary() else {
            eprintln!("keyvault-server binary not built; skipping");
            return;
        };
        let data_dir = TempDir::new().unwrap();

        let status = tokio::process::Command::new(&binary)
            .env("KEYVAULT_MASTER_KEY", STANDARD.encode([1u8; 16]))
            .arg("--data-dir")
            .arg(data_dir.path())
            .arg("--bind")
            .arg(format!("127.0.0.1:{}", next_port()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .unwrap();

        assert!(!status.success());
    }
}
