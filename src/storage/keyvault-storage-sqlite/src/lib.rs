//! # KeyVault Storage - SQLite Backend
//!
//! SQLite implementation of the storage layer. All engines of one vault
//! share a single database file so that keys, versions and the audit
//! ledger live behind the same transactional boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::Transaction;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use keyvault_storage::{Param, StorageError};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite storage backend.
///
/// The database lives at `{base_path}/{name}.db`. The handle is cheap to
/// clone; clones share the same connection pool.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: PathBuf,
    // SQLite has a single writer. A deferred transaction that reads and then
    // writes fails with SQLITE_BUSY_SNAPSHOT if another writer committed
    // meanwhile, so every write on this backend queues here: transactions
    // for their whole lifetime, `execute` and `execute_raw` per call.
    writer: Arc<Mutex<()>>,
}

impl SqliteBackend {
    /// Opens or creates a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where the database file is stored
    /// * `name` - Database name (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        Self::validate_name(name)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{name}.db"));

        debug!(name = %name, path = %db_path.display(), "Opening SQLite database");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!(name = %name, "SQLite backend ready");

        Ok(Self {
            pool,
            db_path,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Returns the path of the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Validates that a database name is safe to use as a file name.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_name(name: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidInput(
                "database name cannot be empty".into(),
            ));
        }

        if name.len() > 64 {
            return Err(StorageError::InvalidInput("database name too long".into()));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "database name must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Executes raw SQL statements (for migrations/schema creation).
    pub async fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        let _guard = self.writer.lock().await;
        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement.trim())
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
        }
        Ok(())
    }

    /// Executes a SQL statement with parameters.
    ///
    /// Returns the number of rows affected. Waits for any open
    /// [`SqliteTransaction`] on this backend to finish first.
    pub async fn execute<'q>(&self, sql: &'q str, params: &[Param<'q>]) -> Result<u64, StorageError> {
        let _guard = self.writer.lock().await;
        let result = bind(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    /// Queries a single row with typed results.
    pub async fn query_one<'q, T>(
        &self,
        sql: &'q str,
        params: &[Param<'q>],
    ) -> Result<Option<T>, StorageError>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        bind_as(sqlx::query_as::<_, T>(sql), params)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)
    }

    /// Queries multiple rows with typed results.
    pub async fn query_all<'q, T>(
        &self,
        sql: &'q str,
        params: &[Param<'q>],
    ) -> Result<Vec<T>, StorageError>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        bind_as(sqlx::query_as::<_, T>(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)
    }

    /// Starts a transaction.
    ///
    /// Transactions on the same backend run one at a time. The transaction
    /// is rolled back when dropped without [`SqliteTransaction::commit`].
    pub async fn begin(&self) -> Result<SqliteTransaction, StorageError> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(SqliteTransaction {
            inner,
            _guard: guard,
        })
    }
}

/// An open transaction on a [`SqliteBackend`].
pub struct SqliteTransaction {
    inner: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    /// Executes a SQL statement inside the transaction.
    ///
    /// Returns the number of rows affected.
    pub async fn execute<'q>(
        &mut self,
        sql: &'q str,
        params: &[Param<'q>],
    ) -> Result<u64, StorageError> {
        let result = bind(sqlx::query(sql), params)
            .execute(&mut *self.inner)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    /// Queries a single row inside the transaction.
    pub async fn query_one<'q, T>(
        &mut self,
        sql: &'q str,
        params: &[Param<'q>],
    ) -> Result<Option<T>, StorageError>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        bind_as(sqlx::query_as::<_, T>(sql), params)
            .fetch_optional(&mut *self.inner)
            .await
            .map_err(query_error)
    }

    /// Commits the transaction.
    pub async fn commit(self) -> Result<(), StorageError> {
        self.inner
            .commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }
}

fn bind<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Param<'q>],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match *param {
            Param::Text(v) => query.bind(v),
            Param::Integer(v) => query.bind(v),
            Param::Blob(v) => query.bind(v),
            Param::Null => query.bind(Option::<i64>::None),
        };
    }
    query
}

fn bind_as<'q, T>(
    mut query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    params: &[Param<'q>],
) -> QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
    for param in params {
        query = match *param {
            Param::Text(v) => query.bind(v),
            Param::Integer(v) => query.bind(v),
            Param::Blob(v) => query.bind(v),
            Param::Null => query.bind(Option::<i64>::None),
        };
    }
    query
}

fn query_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StorageError::Constraint(db.message().to_string())
        }
        _ => StorageError::QueryFailed(e.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id      TEXT PRIMARY KEY,
    counter INTEGER NOT NULL,
    payload BLOB,
    note    TEXT
);
"#;

    async fn setup() -> (TempDir, SqliteBackend) {
        let tmp = TempDir::new().unwrap();
        let backend = SqliteBackend::open(tmp.path(), "test-db").await.unwrap();
        backend.execute_raw(SCHEMA).await.unwrap();
        (tmp, backend)
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let tmp = TempDir::new().unwrap();
        let backend = SqliteBackend::open(tmp.path(), "keyvault").await.unwrap();

        let db_path = tmp.path().join("keyvault.db");
        assert!(db_path.exists(), "database file should be created");
        assert_eq!(backend.path(), db_path.as_path());
    }

    #[tokio::test]
    async fn test_name_validation_empty() {
        let tmp = TempDir::new().unwrap();
        let result = SqliteBackend::open(tmp.path(), "").await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_name_validation_invalid_chars() {
        let tmp = TempDir::new().unwrap();

        for name in ["Vault", "my vault", "vault/sub", "../escape", "vault.db"] {
            let result = SqliteBackend::open(tmp.path(), name).await;
            assert!(
                matches!(result, Err(StorageError::InvalidInput(_))),
                "should reject database name: {name}"
            );
        }
    }

    #[tokio::test]
    async fn test_typed_params_roundtrip() {
        let (_tmp, backend) = setup().await;

        let payload = vec![0u8, 1, 2, 255];
        let affected = backend
            .execute(
                "INSERT INTO items (id, counter, payload, note) VALUES (?, ?, ?, ?)",
                &[Param::Text("a"), Param::Integer(42), (&payload).into(), Param::Null],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let row = backend
            .query_one::<(String, i64, Vec<u8>, Option<String>)>(
                "SELECT id, counter, payload, note FROM items WHERE id = ?",
                &["a".into()],
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row, ("a".to_string(), 42, payload, None));
    }

    #[tokio::test]
    async fn test_query_one_missing_row() {
        let (_tmp, backend) = setup().await;

        let row = backend
            .query_one::<(String,)>("SELECT id FROM items WHERE id = ?", &["nope".into()])
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_unique_violation_is_constraint() {
        let (_tmp, backend) = setup().await;

        let sql = "INSERT INTO items (id, counter) VALUES (?, ?)";
        backend.execute(sql, &["dup".into(), 1i64.into()]).await.unwrap();
        let result = backend.execute(sql, &["dup".into(), 2i64.into()]).await;

        assert!(matches!(result, Err(StorageError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_transaction_commit() {
        let (_tmp, backend) = setup().await;

        let mut tx = backend.begin().await.unwrap();
        tx.execute(
            "INSERT INTO items (id, counter) VALUES (?, ?)",
            &["t".into(), 1i64.into()],
        )
        .await
        .unwrap();
        tx.execute("UPDATE items SET counter = counter + 1 WHERE id = ?", &["t".into()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = backend
            .query_all::<(i64,)>("SELECT counter FROM items", &[])
            .await
            .unwrap();
        assert_eq!(rows, vec![(2,)]);
    }

    #[tokio::test]
    async fn test_transaction_dropped_rolls_back() {
        let (_tmp, backend) = setup().await;

        {
            let mut tx = backend.begin().await.unwrap();
            tx.execute(
                "INSERT INTO items (id, counter) VALUES (?, ?)",
                &["gone".into(), 1i64.into()],
            )
            .await
            .unwrap();
        }

        let rows = backend
            .query_all::<(String,)>("SELECT id FROM items", &[])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rows_affected_for_conditional_update() {
        let (_tmp, backend) = setup().await;

        backend
            .execute(
                "INSERT INTO items (id, counter) VALUES (?, ?)",
                &["cas".into(), 1i64.into()],
            )
            .await
            .unwrap();

        let sql = "UPDATE items SET counter = ? WHERE id = ? AND counter = ?";
        let first = backend
            .execute(sql, &[2i64.into(), "cas".into(), 1i64.into()])
            .await
            .unwrap();
        let second = backend
            .execute(sql, &[2i64.into(), "cas".into(), 1i64.into()])
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_concurrent_read_modify_write_transactions() {
        let (_tmp, backend) = setup().await;
        backend
            .execute(
                "INSERT INTO items (id, counter) VALUES (?, ?)",
                &["n".into(), 0i64.into()],
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = backend.begin().await.unwrap();
                let (counter,) = tx
                    .query_one::<(i64,)>("SELECT counter FROM items WHERE id = ?", &["n".into()])
                    .await
                    .unwrap()
                    .unwrap();
                tx.execute(
                    "UPDATE items SET counter = ? WHERE id = ?",
                    &[(counter + 1).into(), "n".into()],
                )
                .await
                .unwrap();
                tx.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (counter,) = backend
            .query_one::<(i64,)>("SELECT counter FROM items WHERE id = ?", &["n".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter, 10);
    }

    #[tokio::test]
    async fn test_execute_waits_for_open_transaction() {
        let (_tmp, backend) = setup().await;
        backend
            .execute(
                "INSERT INTO items (id, counter) VALUES (?, ?)",
                &["n".into(), 0i64.into()],
            )
            .await
            .unwrap();

        let mut tx = backend.begin().await.unwrap();
        let (counter,) = tx
            .query_one::<(i64,)>("SELECT counter FROM items WHERE id = ?", &["n".into()])
            .await
            .unwrap()
            .unwrap();

        let outside = tokio::spawn({
            let backend = backend.clone();
            async move {
                backend
                    .execute(
                        "INSERT INTO items (id, counter) VALUES (?, ?)",
                        &["other".into(), 1i64.into()],
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!outside.is_finished(), "write ran inside an open transaction");

        tx.execute(
            "UPDATE items SET counter = ? WHERE id = ?",
            &[(counter + 1).into(), "n".into()],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outside.await.unwrap().unwrap(), 1);

        let rows = backend
            .query_all::<(String, i64)>("SELECT id, counter FROM items ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows, vec![("n".to_string(), 1), ("other".to_string(), 1)]);
    }
}
