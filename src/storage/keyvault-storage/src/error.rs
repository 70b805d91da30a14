//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness or foreign-key constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Transaction could not be started, committed or rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid input (bad database name, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
