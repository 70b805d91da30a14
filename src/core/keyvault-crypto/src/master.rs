//! The master key and the key-encryption keys it protects.
//!
//! Per-version key material is only ever stored wrapped under the master
//! key. The wrap is bound to `(key_id, version)` through the AAD, so a
//! wrapped blob copied onto another key or version no longer unwraps.

use zeroize::Zeroizing;

use crate::aead::{self, KEY_SIZE};
use crate::error::CryptoError;
use crate::random;

/// The root of the key hierarchy.
///
/// Supplied once at process start and held in memory for the process
/// lifetime. The bytes never leave this type.
pub struct MasterKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Generates a random master key.
    pub fn generate() -> Self {
        Self {
            bytes: random::key(),
        }
    }

    /// Loads a master key from 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            bytes: Zeroizing::new(array),
        })
    }

    /// Wraps the key material of `key_id` version `version`.
    pub fn wrap_kek(
        &self,
        key_id: &str,
        version: u32,
        material: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let aad = kek_aad(key_id, version);
        aead::encrypt(&*self.bytes, material, Some(aad.as_bytes()))
    }

    /// Unwraps material previously wrapped for the same `key_id` and `version`.
    pub fn unwrap_kek(
        &self,
        key_id: &str,
        version: u32,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let aad = kek_aad(key_id, version);
        aead::decrypt(&*self.bytes, wrapped, Some(aad.as_bytes()))
    }
}

fn kek_aad(key_id: &str, version: u32) -> String {
    format!("keyvault-kek:{key_id}:{version}")
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}
