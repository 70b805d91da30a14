//! Audit records and stored entries.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chain;
use crate::error::AuditError;

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    /// The operation completed.
    Success,
    /// The operation was denied, rejected or failed.
    Failure,
}

impl AuditResult {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl FromStr for AuditResult {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            _ => Err(AuditError::Corrupt(format!("unknown result: {s}"))),
        }
    }
}

/// An entry to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Calling service or principal id.
    pub service_id: String,
    /// Action name.
    pub action: String,
    /// Key involved, if known.
    pub key_id: Option<String>,
    /// Key version involved, if known.
    pub key_version: Option<u32>,
    /// Outcome.
    pub result: AuditResult,
}

impl AuditRecord {
    /// Creates a record with no key context.
    pub fn new(service_id: impl Into<String>, action: impl Into<String>, result: AuditResult) -> Self {
        Self {
            service_id: service_id.into(),
            action: action.into(),
            key_id: None,
            key_version: None,
            result,
        }
    }

    /// Sets the key id.
    pub fn with_key(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sets the key version.
    pub fn with_version(mut self, key_version: u32) -> Self {
        self.key_version = Some(key_version);
        self
    }
}

/// A persisted, chained audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Monotonic sequence id.
    pub id: i64,
    /// Calling service or principal id.
    pub service_id: String,
    /// Action name.
    pub action: String,
    /// Key involved, if known.
    pub key_id: Option<String>,
    /// Key version involved, if known.
    pub key_version: Option<u32>,
    /// Append time (Unix seconds). Not covered by the hash.
    pub timestamp: u64,
    /// Outcome.
    pub result: AuditResult,
    /// Hash of the preceding entry, empty for the first.
    pub prev_hash: String,
    /// Hash of this entry.
    pub hash: String,
}

impl AuditLogEntry {
    /// Recomputes this entry's hash from its fields.
    pub fn compute_hash(&self) -> String {
        chain::compute_hash(
            &self.service_id,
            &self.action,
            self.key_id.as_deref(),
            self.key_version,
            self.result,
            &self.prev_hash,
        )
    }
}
