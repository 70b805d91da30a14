//! Service identity directory backed by SQLite.

use async_trait::async_trait;
use tracing::info;

use keyvault_storage::StorageError;
use keyvault_storage_sqlite::SqliteBackend;

use crate::principal::ROLE_AUDITOR;
use crate::{AuthError, IdentityBackend, Principal};

/// Id of the built-in auditor identity.
pub const AUDITOR_SERVICE_ID: &str = "svc-auditor";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS services (
    id      TEXT PRIMARY KEY,
    name    TEXT NOT NULL,
    role    TEXT NOT NULL,
    active  INTEGER NOT NULL DEFAULT 1
);
"#;

/// Registered service identities.
pub struct ServiceDirectory {
    storage: SqliteBackend,
}

impl ServiceDirectory {
    /// Creates a directory on top of an open backend, creating the table if needed.
    pub async fn new(storage: SqliteBackend) -> Result<Self, AuthError> {
        storage.execute_raw(SCHEMA).await?;
        Ok(Self { storage })
    }

    /// Registers an active service.
    pub async fn register(&self, id: &str, name: &str, role: &str) -> Result<Principal, AuthError> {
        if id.trim().is_empty() {
            return Err(AuthError::InvalidInput("service id cannot be empty".into()));
        }
        if role.trim().is_empty() {
            return Err(AuthError::InvalidInput("role cannot be empty".into()));
        }

        self.storage
            .execute(
                "INSERT INTO services (id, name, role, active) VALUES (?, ?, ?, 1)",
                &[id.into(), name.into(), role.into()],
            )
            .await
            .map_err(|e| match e {
                StorageError::Constraint(_) => AuthError::AlreadyExists(id.to_string()),
                other => other.into(),
            })?;

        info!(service_id = %id, role = %role, "Service registered");

        Ok(Principal::new(id, role))
    }

    /// Marks a service inactive. Its id can no longer be resolved.
    pub async fn deactivate(&self, id: &str) -> Result<(), AuthError> {
        let affected = self
            .storage
            .execute("UPDATE services SET active = 0 WHERE id = ?", &[id.into()])
            .await?;

        if affected == 0 {
            return Err(AuthError::InvalidIdentity(id.to_string()));
        }

        info!(service_id = %id, "Service deactivated");
        Ok(())
    }

    /// Registers the built-in `svc-auditor` identity if it is missing.
    pub async fn seed_auditor(&self) -> Result<(), AuthError> {
        let inserted = self
            .storage
            .execute(
                "INSERT OR IGNORE INTO services (id, name, role, active) VALUES (?, ?, ?, 1)",
                &[AUDITOR_SERVICE_ID.into(), "Auditor".into(), ROLE_AUDITOR.into()],
            )
            .await?;

        if inserted > 0 {
            info!(service_id = AUDITOR_SERVICE_ID, "Seeded auditor service");
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for ServiceDirectory {
    async fn resolve(&self, service_id: &str) -> Result<Principal, AuthError> {
        let row = self
            .storage
            .query_one::<(String, String)>(
                "SELECT id, role FROM services WHERE id = ? AND active = 1",
                &[service_id.into()],
            )
            .await?;

        match row {
            Some((id, role)) => Ok(Principal { id, role }),
            None => Err(AuthError::InvalidIdentity(service_id.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "service-directory"
    }
}
