//! SQLite-backed durable store

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::schema::{init_schema, needs_init};
use super::{run_blocking, DurableStore, StorageError, StorageResult};

/// Key-value store persisted in a single SQLite table
///
/// Each write runs as its own statement in autocommit mode, so a returned
/// `Ok(())` means the row is on disk. Statements run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    StorageError::CreateDirectory {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let conn = Connection::open(path)?;
        debug!("Opened SQLite store at {:?}", path);
        Self::from_connection(conn)
    }

    /// In-memory database, mostly useful in tests
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
            let conn = guard.as_ref().ok_or(StorageError::Closed)?;
            Ok(f(conn)?)
        })
        .await
    }
}

/// Smallest string greater than every string starting with `prefix`
///
/// SQLite compares TEXT bytewise and UTF-8 preserves code point order, so
/// bumping the last code point bounds the prefix range. `None` means the
/// range is unbounded above.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last as u32 {
            0xD7FF => Some('\u{E000}'),
            code => char::from_u32(code + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let key = key.to_string();
        let now = chrono::Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                params![key, value, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let lower = prefix.to_string();
        let upper = prefix_upper_bound(prefix);
        self.with_conn(move |conn| match upper {
            Some(upper) => {
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv_store WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![lower, upper], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(keys)
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT key FROM kv_store WHERE key >= ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![lower], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(keys)
            }
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| StorageError::Database(e))?;
            }
            Ok(())
        })
        .await
    }
}
