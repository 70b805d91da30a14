//! Key and key-version records.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use keyvault_crypto::KeyType;

use crate::error::KmsError;

/// Lifecycle status of a logical key. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    /// Key can be used and rotated.
    Active,
    /// Key is permanently retired.
    Revoked,
}

impl FromStr for KeyStatus {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "REVOKED" => Ok(Self::Revoked),
            _ => Err(KmsError::Internal(format!("unknown key status: {s}"))),
        }
    }
}

/// Status of a single key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionStatus {
    /// The version used for new encryptions. At most one per key.
    Active,
    /// Superseded by a newer version; still usable for decryption.
    Rotated,
    /// Explicitly retired; unusable for decryption.
    Revoked,
}

impl FromStr for VersionStatus {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "ROTATED" => Ok(Self::Rotated),
            "REVOKED" => Ok(Self::Revoked),
            _ => Err(KmsError::Internal(format!("unknown version status: {s}"))),
        }
    }
}

/// Declared intent of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyPurpose {
    /// Envelope encryption and decryption.
    Encrypt,
    /// Signing (material is generated but never used by this service).
    Sign,
    /// Any other declared intent, upper-case `[A-Z0-9_]`.
    Other(String),
}

impl KeyPurpose {
    /// Returns the canonical name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Encrypt => "ENCRYPT",
            Self::Sign => "SIGN",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPurpose {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENCRYPT" => Ok(Self::Encrypt),
            "SIGN" => Ok(Self::Sign),
            _ => {
                if s.is_empty() || s.len() > 64 {
                    return Err(KmsError::InvalidPurpose(
                        "purpose must be 1-64 characters".into(),
                    ));
                }
                if !s
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
                {
                    return Err(KmsError::InvalidPurpose(format!(
                        "purpose must match [A-Z0-9_]+, got {s:?}"
                    )));
                }
                Ok(Self::Other(s.to_string()))
            }
        }
    }
}

impl TryFrom<String> for KeyPurpose {
    type Error = KmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyPurpose> for String {
    fn from(value: KeyPurpose) -> Self {
        value.as_str().to_string()
    }
}

/// Parameters for creating a key.
#[derive(Debug, Clone)]
pub struct KeySpec {
    /// Key type.
    pub key_type: KeyType,
    /// Declared purpose.
    pub purpose: KeyPurpose,
    /// Size in bits; required for AES, ignored otherwise.
    pub size: Option<u32>,
}

impl KeySpec {
    /// Spec for an AES key used for envelope encryption.
    pub fn aes_encrypt(size: u32) -> Self {
        Self {
            key_type: KeyType::Aes,
            purpose: KeyPurpose::Encrypt,
            size: Some(size),
        }
    }
}

/// A named key owned by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalKey {
    /// Opaque, globally unique identifier (`key_<hex>`).
    pub id: String,
    /// Key type.
    pub key_type: KeyType,
    /// Size class in bits; rotations generate material of the same class.
    pub key_size: u32,
    /// Declared purpose.
    pub purpose: KeyPurpose,
    /// Lifecycle status.
    pub status: KeyStatus,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Revocation timestamp (Unix seconds).
    pub revoked_at: Option<u64>,
}

/// One generation of key material under a [`LogicalKey`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Version row identifier (`ver_<hex>`).
    pub id: String,
    /// Owning key id.
    pub key_id: String,
    /// Dense version number starting at 1.
    pub version: u32,
    /// Key material wrapped under the master key.
    #[serde(skip)]
    pub encrypted_key: Vec<u8>,
    /// Version status.
    pub status: VersionStatus,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

impl std::fmt::Debug for KeyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVersion")
            .field("id", &self.id)
            .field("key_id", &self.key_id)
            .field("version", &self.version)
            .field("encrypted_key", &format_args!("[{} bytes]", self.encrypted_key.len()))
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Result of an envelope encryption under a key's active version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Payload encrypted under the one-time DEK.
    pub ciphertext: Vec<u8>,
    /// DEK wrapped under the version's KEK.
    pub encrypted_dek: Vec<u8>,
    /// Version whose KEK wrapped the DEK.
    pub key_version: u32,
}
