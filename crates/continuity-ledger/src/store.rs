//! SQLite-backed ledger store.
//!
//! Every operation opens its own connection on the blocking pool. Writes run
//! inside `BEGIN IMMEDIATE` transactions, which take the database write lock
//! before the first read. A balance check and the decrement that follows it
//! therefore always happen under the same exclusive lock, across threads and
//! across processes sharing the file. The transaction is a scoped guard: if
//! the closure returns an error or panics it is dropped and rolled back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::retry::with_lock_retry;
use crate::schema::init_schema;

/// Handle to the ledger database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct LedgerStore {
    config: Arc<LedgerConfig>,
}

impl LedgerStore {
    /// Open the ledger, creating the database file and schema if needed.
    pub async fn open(config: LedgerConfig) -> LedgerResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path = config.db_path.clone();
        let busy_timeout = config.busy_timeout;
        tokio::task::spawn_blocking(move || -> LedgerResult<()> {
            let conn = open_connection(&path, busy_timeout)?;
            init_schema(&conn)
        })
        .await??;

        info!(path = %config.db_path.display(), "Ledger store opened");
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.db_path
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Run a read-only query on a fresh connection.
    pub async fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.config.db_path.clone();
        let busy_timeout = self.config.busy_timeout;
        tokio::task::spawn_blocking(move || -> LedgerResult<T> {
            let conn = open_connection(&path, busy_timeout)?;
            f(&conn)
        })
        .await?
    }

    /// Run `f` inside an immediate write transaction.
    ///
    /// `f` may run more than once if the write lock is contended; it must
    /// only touch the database through the connection it is given.
    pub async fn write<T, F>(&self, operation: &'static str, f: F) -> LedgerResult<T>
    where
        F: Fn(&Connection) -> LedgerResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        with_lock_retry(&self.config.lock_retry, operation, || {
            let f = Arc::clone(&f);
            let path = self.config.db_path.clone();
            let busy_timeout = self.config.busy_timeout;
            async move {
                tokio::task::spawn_blocking(move || -> LedgerResult<T> {
                    let mut conn = open_connection(&path, busy_timeout)?;
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let value = f(&tx)?;
                    tx.commit()?;
                    debug!(operation, "Ledger transaction committed");
                    Ok(value)
                })
                .await?
            }
        })
        .await
    }

    /// Verify the database answers queries.
    pub async fn ping(&self) -> LedgerResult<()> {
        self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> LedgerResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    async fn temp_store() -> (tempfile::TempDir, LedgerStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LedgerStore::open(LedgerConfig::with_path(dir.path().join("ledger.db")))
            .await
            .expect("open");
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_creates_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/dir/ledger.db");
        let store = LedgerStore::open(LedgerConfig::with_path(&path)).await.expect("open");
        assert!(path.exists());
        store.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let (_dir, store) = temp_store().await;

        let result: LedgerResult<()> = store
            .write("test_rollback", |conn| {
                conn.execute(
                    "INSERT INTO users (id, balance, created_at_ms, updated_at_ms) VALUES ('u1', 5, 0, 0)",
                    [],
                )?;
                Err(LedgerError::corrupt("abort"))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_write_commits() {
        let (_dir, store) = temp_store().await;

        store
            .write("test_commit", |conn| {
                conn.execute(
                    "INSERT INTO users (id, balance, created_at_ms, updated_at_ms) VALUES ('u1', 5, 0, 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let balance: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT balance FROM users WHERE id = 'u1'", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(balance, 5);
    }
}
