//! Authorization error types.

use thiserror::Error;

/// Errors that can occur during identity resolution and authorization.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The role does not grant the requested action.
    #[error("permission denied: role {role} cannot perform {action}")]
    PermissionDenied {
        /// Caller's role.
        role: String,
        /// Requested action.
        action: String,
    },

    /// Unknown or inactive service identity.
    #[error("invalid service identity: {0}")]
    InvalidIdentity(String),

    /// A service with this id is already registered.
    #[error("service already registered: {0}")]
    AlreadyExists(String),

    /// Malformed registration input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<keyvault_storage::StorageError> for AuthError {
    fn from(e: keyvault_storage::StorageError) -> Self {
        AuthError::Storage(e.to_string())
    }
}
