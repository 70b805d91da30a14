//! # KeyVault Storage
//!
//! Storage abstraction layer for KeyVault backends.
//!
//! Provides the error type and bind-parameter values shared by every
//! backend implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod param;

pub use error::StorageError;
pub use param::Param;
