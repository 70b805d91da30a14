//! Audit ledger error types.

use thiserror::Error;

/// Errors that can occur in the audit ledger.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored row could not be decoded.
    #[error("corrupt audit entry: {0}")]
    Corrupt(String),
}

impl From<keyvault_storage::StorageError> for AuditError {
    fn from(e: keyvault_storage::StorageError) -> Self {
        AuditError::Storage(e.to_string())
    }
}
