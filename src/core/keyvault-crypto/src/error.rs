//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The integrity tag did not verify (tampered data, wrong key or
    /// truncated blob).
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Key type is not recognised.
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Key size is not allowed for the key type.
    #[error("invalid key size: {0}")]
    InvalidSize(String),

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
