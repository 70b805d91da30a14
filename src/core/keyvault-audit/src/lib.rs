//! # KeyVault Audit Ledger
//!
//! Append-only, hash-chained log of privileged actions.
//!
//! Every entry stores the hash of its predecessor and a hash over its own
//! fields, so altering, deleting or reordering any historical row is
//! detected when the chain is recomputed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod entry;
pub mod error;

pub use chain::{verify, BreakReason, ChainStatus, GENESIS_HASH};
pub use entry::{AuditLogEntry, AuditRecord, AuditResult};
pub use error::AuditError;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use keyvault_storage_sqlite::SqliteBackend;

/// Number of entries returned by [`AuditLedger::fetch`] when no limit is given.
pub const DEFAULT_FETCH_LIMIT: usize = 100;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id  TEXT NOT NULL,
    action      TEXT NOT NULL,
    key_id      TEXT,
    key_version INTEGER,
    timestamp   INTEGER NOT NULL,
    result      TEXT NOT NULL CHECK (result IN ('SUCCESS', 'FAILURE')),
    prev_hash   TEXT NOT NULL,
    hash        TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_logs_prev_hash ON audit_logs(prev_hash);
"#;

const COLUMNS: &str = "id, service_id, action, key_id, key_version, timestamp, result, prev_hash, hash";

type EntryRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<i64>,
    i64,
    String,
    String,
    String,
);

/// The audit ledger.
pub struct AuditLedger {
    storage: SqliteBackend,
    // One writer at a time: "read last hash, compute, insert".
    append_lock: Mutex<()>,
}

impl AuditLedger {
    /// Creates a ledger on top of an open backend, creating the table if needed.
    pub async fn new(storage: SqliteBackend) -> Result<Self, AuditError> {
        storage.execute_raw(SCHEMA).await?;

        info!("Audit ledger initialized");

        Ok(Self {
            storage,
            append_lock: Mutex::new(()),
        })
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    fn entry_from_row(row: EntryRow) -> Result<AuditLogEntry, AuditError> {
        let (id, service_id, action, key_id, key_version, timestamp, result, prev_hash, hash) = row;
        Ok(AuditLogEntry {
            id,
            service_id,
            action,
            key_id,
            key_version: key_version
                .map(|v| {
                    u32::try_from(v)
                        .map_err(|_| AuditError::Corrupt(format!("key version out of range: {v}")))
                })
                .transpose()?,
            timestamp: timestamp as u64,
            result: result.parse()?,
            prev_hash,
            hash,
        })
    }

    /// Appends a record, chaining it to the most recent entry.
    pub async fn append(&self, record: AuditRecord) -> Result<AuditLogEntry, AuditError> {
        let _guard = self.append_lock.lock().await;

        let mut tx = self.storage.begin().await?;

        let prev_hash = tx
            .query_one::<(String,)>("SELECT hash FROM audit_logs ORDER BY id DESC LIMIT 1", &[])
            .await?
            .map(|(hash,)| hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let hash = chain::compute_hash(
            &record.service_id,
            &record.action,
            record.key_id.as_deref(),
            record.key_version,
            record.result,
            &prev_hash,
        );
        let timestamp = Self::now();

        let (id,) = tx
            .query_one::<(i64,)>(
                "INSERT INTO audit_logs (service_id, action, key_id, key_version, timestamp, result, prev_hash, hash) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                &[
                    record.service_id.as_str().into(),
                    record.action.as_str().into(),
                    record.key_id.as_deref().into(),
                    record.key_version.into(),
                    timestamp.into(),
                    record.result.as_str().into(),
                    prev_hash.as_str().into(),
                    hash.as_str().into(),
                ],
            )
            .await?
            .ok_or_else(|| AuditError::Storage("insert returned no id".into()))?;

        tx.commit().await?;

        debug!(
            id = id,
            service_id = %record.service_id,
            action = %record.action,
            result = record.result.as_str(),
            "Audit entry appended"
        );

        Ok(AuditLogEntry {
            id,
            service_id: record.service_id,
            action: record.action,
            key_id: record.key_id,
            key_version: record.key_version,
            timestamp: timestamp as u64,
            result: record.result,
            prev_hash,
            hash,
        })
    }

    /// Returns up to `limit` entries, most recent first.
    pub async fn fetch(&self, limit: usize) -> Result<Vec<AuditLogEntry>, AuditError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!("SELECT {COLUMNS} FROM audit_logs ORDER BY id DESC LIMIT ?");
        self.storage
            .query_all::<EntryRow>(&sql, &[limit.into()])
            .await?
            .into_iter()
            .map(Self::entry_from_row)
            .collect()
    }

    /// Returns the whole ledger in ascending sequence order.
    pub async fn entries(&self) -> Result<Vec<AuditLogEntry>, AuditError> {
        let sql = format!("SELECT {COLUMNS} FROM audit_logs ORDER BY id ASC");
        self.storage
            .query_all::<EntryRow>(&sql, &[])
            .await?
            .into_iter()
            .map(Self::entry_from_row)
            .collect()
    }

    /// Recomputes the whole chain.
    pub async fn verify_ledger(&self) -> Result<ChainStatus, AuditError> {
        let entries = self.entries().await?;
        let status = chain::verify(&entries);

        match status {
            ChainStatus::Valid => {
                info!(entries = entries.len(), "Audit chain verified");
            }
            ChainStatus::Broken {
                index,
                sequence,
                reason,
            } => {
                error!(index = index, sequence = sequence, reason = ?reason, "Audit chain broken");
            }
        }

        Ok(status)
    }
}
