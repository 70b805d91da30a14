//! Identity backend trait.

use async_trait::async_trait;

use crate::{AuthError, Principal};

/// Trait for identity backends.
///
/// Implementations map a caller-supplied service id to a [`Principal`].
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Resolves a service id.
    ///
    /// # Returns
    ///
    /// * `Ok(Principal)` - If the service exists and is active
    /// * `Err(AuthError::InvalidIdentity)` - Otherwise
    async fn resolve(&self, service_id: &str) -> Result<Principal, AuthError>;

    /// Returns the name of this backend for logging/debugging.
    fn name(&self) -> &'static str;
}
