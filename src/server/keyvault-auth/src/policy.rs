//! Role-based access policy.
//!
//! A static table from role name to permitted actions. No per-key ACLs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::principal::{ROLE_ADMIN, ROLE_AUDITOR, ROLE_SERVICE};

/// A privileged action. The name doubles as the audit action name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a key.
    KeyCreate,
    /// Rotate a key.
    KeyRotate,
    /// Revoke a key or key version.
    KeyRevoke,
    /// Encrypt under a key.
    Encrypt,
    /// Decrypt under a key.
    Decrypt,
    /// Read or verify the audit log.
    AuditRead,
}

impl Action {
    /// Every action.
    pub const ALL: [Action; 6] = [
        Action::KeyCreate,
        Action::KeyRotate,
        Action::KeyRevoke,
        Action::Encrypt,
        Action::Decrypt,
        Action::AuditRead,
    ];

    /// Returns the action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyCreate => "key_create",
            Self::KeyRotate => "key_rotate",
            Self::KeyRevoke => "key_revoke",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::AuditRead => "audit_read",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AuthError::InvalidInput(format!("unknown action: {s}")))
    }
}

const ADMIN_ACTIONS: &[Action] = &Action::ALL;

const SERVICE_ACTIONS: &[Action] = &[
    Action::KeyCreate,
    Action::KeyRotate,
    Action::Encrypt,
    Action::Decrypt,
];

const AUDITOR_ACTIONS: &[Action] = &[Action::AuditRead];

/// The role to action table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// Returns the actions granted to `role`. Unknown roles get none.
    pub fn permissions(&self, role: &str) -> &'static [Action] {
        match role {
            ROLE_ADMIN => ADMIN_ACTIONS,
            ROLE_SERVICE => SERVICE_ACTIONS,
            ROLE_AUDITOR => AUDITOR_ACTIONS,
            _ => &[],
        }
    }

    /// Checks whether `role` may perform `action`.
    pub fn authorize(&self, role: &str, action: Action) -> Result<(), AuthError> {
        if self.permissions(role).contains(&action) {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied {
                role: role.to_string(),
                action: action.as_str().to_string(),
            })
        }
    }
}
