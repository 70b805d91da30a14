//! # KeyVault Crypto
//!
//! Core cryptographic primitives for KeyVault.
//!
//! This crate provides:
//! - Symmetric authenticated encryption (AES-128/256-GCM)
//! - Key material generation (AES, RSA, ECC)
//! - Two-tier envelope encryption (KEK wraps a per-call DEK)
//! - The master key, which wraps per-version key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod envelope;
pub mod error;
pub mod keygen;
pub mod master;
mod random;

pub use envelope::Envelope;
pub use error::CryptoError;
pub use keygen::KeyType;
pub use master::MasterKey;
