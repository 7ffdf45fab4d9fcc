//! Durable key-value storage
//!
//! The queue and the response cache persist through the [`DurableStore`]
//! trait. Keys are opaque strings; values are JSON text.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local, clones share contents
//! - [`SqliteStore`]: single `kv_store` table in a SQLite database
//! - [`FileStore`]: one file per key, written atomically
//!
//! Every `set`/`remove` is committed before it returns; components treat a
//! returned `Ok(())` as "durable".

pub mod error;
pub mod file;
pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Asynchronous key-value store used by the stateful components
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// List every key starting with `prefix`, in ascending order
    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Release underlying resources; later calls fail with [`StorageError::Closed`]
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Run blocking storage work off the async runtime threads
pub(crate) async fn run_blocking<T, F>(work: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::corrupt(key, e)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw).await
}
