//! # KeyVault Auth
//!
//! Authorization for KeyVault.
//!
//! - [`AccessPolicy`]: static role to action table
//! - [`Principal`]: an authenticated service identity and its role
//! - [`ServiceDirectory`]: registered service identities, behind the
//!   [`IdentityBackend`] trait

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod directory;
pub mod error;
pub mod policy;
pub mod principal;

pub use backend::IdentityBackend;
pub use directory::ServiceDirectory;
pub use error::AuthError;
pub use policy::{AccessPolicy, Action};
pub use principal::Principal;
