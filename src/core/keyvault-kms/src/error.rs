//! KMS engine error types.

use thiserror::Error;

/// Errors that can occur in the key lifecycle store.
#[derive(Debug, Error)]
pub enum KmsError {
    /// Key not found (or, for revocation, already revoked).
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Key version not found.
    #[error("key version not found: {key_id} v{version}")]
    VersionNotFound {
        /// Key id.
        key_id: String,
        /// Version number.
        version: u32,
    },

    /// Key is revoked.
    #[error("key is revoked: {0}")]
    KeyRevoked(String),

    /// Key version is revoked.
    #[error("key version is revoked: {key_id} v{version}")]
    VersionRevoked {
        /// Key id.
        key_id: String,
        /// Version number.
        version: u32,
    },

    /// Key has no active version.
    #[error("no active version for key: {0}")]
    NoActiveVersion(String),

    /// The active version of a live key cannot be revoked on its own.
    #[error("version {version} is the active version of {key_id}; rotate first")]
    VersionActive {
        /// Key id.
        key_id: String,
        /// Version number.
        version: u32,
    },

    /// Key was not created for this purpose.
    #[error("key {key_id} has purpose {purpose}")]
    PurposeMismatch {
        /// Key id.
        key_id: String,
        /// Declared purpose of the key.
        purpose: String,
    },

    /// Operation not allowed for key type.
    #[error("operation not allowed: {operation} on {key_type}")]
    OperationNotAllowed {
        /// Operation name.
        operation: String,
        /// Key type.
        key_type: String,
    },

    /// Purpose string is malformed.
    #[error("invalid purpose: {0}")]
    InvalidPurpose(String),

    /// The active version changed underneath a rotation.
    #[error("concurrent modification of key: {0}")]
    ConcurrentModification(String),

    /// Stored key material could not be unwrapped with the master key.
    #[error("failed to unwrap key material for {key_id} v{version}")]
    UnwrapFailed {
        /// Key id.
        key_id: String,
        /// Version number.
        version: u32,
    },

    /// Payload or DEK integrity check failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error (task failure, corrupt row).
    #[error("internal error: {0}")]
    Internal(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] keyvault_crypto::CryptoError),
}

impl From<keyvault_storage::StorageError> for KmsError {
    fn from(e: keyvault_storage::StorageError) -> Self {
        KmsError::Storage(e.to_string())
    }
}
