//! Authenticated principal.

use serde::{Deserialize, Serialize};

/// Role with every permission.
pub const ROLE_ADMIN: &str = "ADMIN";
/// Role for client services using keys.
pub const ROLE_SERVICE: &str = "SERVICE";
/// Read-only audit role.
pub const ROLE_AUDITOR: &str = "AUDITOR";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Service id, recorded in audit entries.
    pub id: String,
    /// Role name. Unknown roles are granted nothing.
    pub role: String,
}

impl Principal {
    /// Creates a principal.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }

    /// Creates an `ADMIN` principal.
    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ROLE_ADMIN)
    }

    /// Creates a `SERVICE` principal.
    pub fn service(id: impl Into<String>) -> Self {
        Self::new(id, ROLE_SERVICE)
    }

    /// Creates an `AUDITOR` principal.
    pub fn auditor(id: impl Into<String>) -> Self {
        Self::new(id, ROLE_AUDITOR)
    }
}
