//! SQLite implementation of `KeyValueStore`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{KeyValueStore, StoreError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed key-value store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    ///
    /// The database is configured with `journal_mode = WAL`,
    /// `synchronous = FULL` and `busy_timeout = 5000ms`, so queued records
    /// survive a crash and the CLI can inspect the file while the server runs.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            warn!(
                "SQLite kept journal_mode '{}' instead of WAL for {}",
                journal_mode, path_str
            );
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS list_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_list_entries_key
                    ON list_entries(key, id);
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::storage(operation, "connection mutex poisoned"))?;
            f(&conn).map_err(|e| StoreError::storage(operation, e.to_string()))
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
    }
}

fn count_to_i64(count: usize, operation: &'static str) -> Result<i64, StoreError> {
    i64::try_from(count).map_err(|_| {
        StoreError::storage(
            operation,
            format!("count {} exceeds maximum storable value ({})", count, i64::MAX),
        )
    })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn("get", move |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn("set", move |conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn("set_if_absent", move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO kv_entries (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.with_conn("exists", move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM kv_entries WHERE key = ?1)
                     OR EXISTS(SELECT 1 FROM list_entries WHERE key = ?1)",
                params![key],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.with_conn("delete", move |conn| {
            let values = conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
            let entries = conn.execute("DELETE FROM list_entries WHERE key = ?1", params![key])?;
            Ok(values + entries > 0)
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn("keys_with_prefix", move |conn| {
            // substr() instead of LIKE so that '%' and '_' in prefixes are literal.
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn("list_push", move |conn| {
            conn.execute(
                "INSERT INTO list_entries (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            let len: i64 = conn.query_row(
                "SELECT COUNT(*) FROM list_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(len).unwrap_or(0))
        })
        .await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.with_conn("list_range", move |conn| {
            let mut stmt =
                conn.prepare("SELECT value FROM list_entries WHERE key = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![key], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    async fn list_trim_front(&self, key: &str, count: usize) -> Result<(), StoreError> {
        let key = key.to_string();
        let limit = count_to_i64(count, "list_trim_front")?;
        self.with_conn("list_trim_front", move |conn| {
            conn.execute(
                "DELETE FROM list_entries WHERE id IN (
                     SELECT id FROM list_entries WHERE key = ?1 ORDER BY id LIMIT ?2
                 )",
                params![key, limit],
            )
            .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_keeps_first_value() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.set_if_absent("k", "first").await.unwrap());
        assert!(!store.set_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_prefix_is_literal() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.set("a_%:x", "1").await.unwrap();
        store.set("abc:x", "2").await.unwrap();

        let keys = store.keys_with_prefix("a_%:").await.unwrap();
        assert_eq!(keys, vec!["a_%:x".to_string()]);
    }

    #[tokio::test]
    async fn test_list_operations() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.list_push("rooms", "a").await.unwrap(), 1);
        assert_eq!(store.list_push("rooms", "b").await.unwrap(), 2);
        assert_eq!(store.list_push("rooms", "c").await.unwrap(), 3);
        assert!(store.exists("rooms").await.unwrap());

        store.list_trim_front("rooms", 2).await.unwrap();
        assert_eq!(store.list_range("rooms").await.unwrap(), vec!["c"]);

        assert!(store.delete("rooms").await.unwrap());
        assert!(!store.exists("rooms").await.unwrap());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("queue.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.set("j2m:action:postComment_1", "{}").await.unwrap();
            store.list_push("j2m:rooms", "{}").await.unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(
            store.keys_with_prefix("j2m:action:").await.unwrap(),
            vec!["j2m:action:postComment_1".to_string()]
        );
        assert_eq!(store.list_range("j2m:rooms").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_database_records_current_version() {
        let store = SqliteStore::new_in_memory().unwrap();
        let version: i64 = store
            .with_conn("version", |conn| {
                conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                    row.get(0)
                })
            })
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL);
                 INSERT INTO schema_version (id, version) VALUES (1, 99);",
            )
            .unwrap();
        }

        assert!(SqliteStore::new(&path).is_err());
    }
}
