//! Caller-facing error taxonomy.

use thiserror::Error;

use keyvault_audit::AuditError;
use keyvault_auth::AuthError;
use keyvault_crypto::CryptoError;
use keyvault_kms::KmsError;

/// Errors returned by [`crate::KeyVault`] operations.
///
/// Every lower-level error is folded into one of six kinds.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input (bad type, size, purpose or encoding).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown key or version.
    #[error("not found: {0}")]
    NotFound(String),

    /// Key revoked, version revoked, no active version, wrong purpose.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Integrity check failed. Deliberately carries no detail.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// The caller's role lacks the permission, or the caller is unknown.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Storage, transaction or audit failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable name of the error kind, for transports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::UnsupportedKeyType(_) | CryptoError::InvalidSize(_) => {
                ApiError::Validation(e.to_string())
            }
            CryptoError::AuthenticationFailed => ApiError::AuthenticationFailure,
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<KmsError> for ApiError {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::KeyNotFound(_) | KmsError::VersionNotFound { .. } => {
                ApiError::NotFound(e.to_string())
            }
            KmsError::KeyRevoked(_)
            | KmsError::VersionRevoked { .. }
            | KmsError::NoActiveVersion(_)
            | KmsError::VersionActive { .. }
            | KmsError::PurposeMismatch { .. }
            | KmsError::OperationNotAllowed { .. }
            | KmsError::ConcurrentModification(_) => ApiError::StateConflict(e.to_string()),
            KmsError::InvalidPurpose(_) => ApiError::Validation(e.to_string()),
            KmsError::DecryptionFailed => ApiError::AuthenticationFailure,
            KmsError::Crypto(inner) => inner.into(),
            KmsError::UnwrapFailed { .. } | KmsError::Storage(_) | KmsError::Internal(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::PermissionDenied { .. } | AuthError::InvalidIdentity(_) => {
                ApiError::PermissionDenied(e.to_string())
            }
            AuthError::InvalidInput(_) => ApiError::Validation(e.to_string()),
            AuthError::AlreadyExists(_) => ApiError::StateConflict(e.to_string()),
            AuthError::Storage(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<keyvault_storage::StorageError> for ApiError {
    fn from(e: keyvault_storage::StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
