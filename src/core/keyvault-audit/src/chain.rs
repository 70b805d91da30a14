//! Hash chain computation and verification.
//!
//! Each entry's hash covers `service_id`, `action`, `key_id`,
//! `key_version`, `result` and `prev_hash`, in that order. Fields are
//! length-prefixed (8-byte big-endian) and optional fields carry a
//! presence byte, so no two distinct entries share an encoding.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::entry::{AuditLogEntry, AuditResult};

/// `prev_hash` of the first entry in the ledger.
pub const GENESIS_HASH: &str = "";

fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn optional(hasher: &mut Sha256, bytes: Option<&[u8]>) {
    match bytes {
        Some(bytes) => {
            hasher.update([1u8]);
            field(hasher, bytes);
        }
        None => hasher.update([0u8]),
    }
}

/// Computes the hex-encoded SHA-256 hash of an entry.
///
/// Fields are not simply concatenated. An external verifier must feed
/// SHA-256, in this order:
///
/// - `service_id`, `action`: 8-byte big-endian length, then the UTF-8 bytes
/// - `key_id`: `0x00` if absent, else `0x01` followed by the length-prefixed bytes
/// - `key_version`: `0x00` if absent, else `0x01`, length `4`, the version as u32 big-endian
/// - `result` (`SUCCESS` / `FAILURE`), `prev_hash` (hex text, `""` for the
///   first entry): length-prefixed as above
///
/// The timestamp is not hashed.
pub fn compute_hash(
    service_id: &str,
    action: &str,
    key_id: Option<&str>,
    key_version: Option<u32>,
    result: AuditResult,
    prev_hash: &str,
) -> String {
    let version = key_version.map(u32::to_be_bytes);

    let mut hasher = Sha256::new();
    field(&mut hasher, service_id.as_bytes());
    field(&mut hasher, action.as_bytes());
    optional(&mut hasher, key_id.map(str::as_bytes));
    optional(&mut hasher, version.as_ref().map(|v| v.as_slice()));
    field(&mut hasher, result.as_str().as_bytes());
    field(&mut hasher, prev_hash.as_bytes());

    hex::encode(hasher.finalize())
}

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakReason {
    /// The stored hash does not match the recomputed one.
    HashMismatch,
    /// `prev_hash` does not match the predecessor's hash.
    PrevHashMismatch,
}

/// Result of a chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    /// Every entry links to its predecessor and hashes correctly.
    Valid,
    /// The first offending entry.
    Broken {
        /// 0-based position in the verified slice.
        index: usize,
        /// Sequence id of the entry.
        sequence: i64,
        /// What failed.
        reason: BreakReason,
    },
}

impl ChainStatus {
    /// Returns `true` if the chain verified.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Verifies a ledger given in ascending sequence order, starting at the
/// first entry ever appended.
pub fn verify(entries: &[AuditLogEntry]) -> ChainStatus {
    let mut expected_prev = GENESIS_HASH;

    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash != expected_prev {
            return ChainStatus::Broken {
                index,
                sequence: entry.id,
                reason: BreakReason::PrevHashMismatch,
            };
        }

        if entry.compute_hash() != entry.hash {
            return ChainStatus::Broken {
                index,
                sequence: entry.id,
                reason: BreakReason::HashMismatch,
            };
        }

        expected_prev = entry.hash.as_str();
    }

    ChainStatus::Valid
}
