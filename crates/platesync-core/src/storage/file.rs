//! File-per-key durable store
//!
//! Each record lives in a file named by the SHA-256 of its key, so key
//! length and characters never reach the file system. The file holds the
//! original key next to the value, which is how `list_keys` recovers it.
//! Writes go to a temporary file which is synced and then renamed over the
//! target, so a crash never leaves a half-written record behind.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{run_blocking, DurableStore, StorageError, StorageResult};

const RECORD_EXTENSION: &str = "json";

/// On-disk layout of one record
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

/// Durable store keeping one file per key
pub struct FileStore {
    dir: Arc<PathBuf>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self { dir: Arc::new(dir) })
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn record_path(dir: &Path, key: &str) -> PathBuf {
    let name = hex::encode(Sha256::digest(key.as_bytes()));
    dir.join(format!("{}.{}", name, RECORD_EXTENSION))
}

fn read_record(path: &Path) -> StorageResult<Option<Record>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::ReadError {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::corrupt(path.display().to_string(), e))
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = record_path(&self.dir, key);
        let key = key.to_string();
        run_blocking(move || {
            Ok(read_record(&path)?
                .filter(|record| record.key == key)
                .map(|record| record.value))
        })
        .await
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let path = record_path(&self.dir, key);
        let record = Record {
            key: key.to_string(),
            value,
        };
        let data = serde_json::to_vec(&record).map_err(|source| StorageError::Encode {
            key: record.key.clone(),
            source,
        })?;
        run_blocking(move || {
            atomic_write(&path, &data).map_err(|e| StorageError::from_io(e, path))
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = record_path(&self.dir, key);
        run_blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = Arc::clone(&self.dir);
        let prefix = prefix.to_string();
        run_blocking(move || {
            let entries = fs::read_dir(dir.as_path()).map_err(|source| StorageError::ReadError {
                path: dir.to_path_buf(),
                source,
            })?;

            let mut keys = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|source| StorageError::ReadError {
                        path: dir.to_path_buf(),
                        source,
                    })?
                    .path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                if let Some(record) = read_record(&path)? {
                    if record.key.starts_with(&prefix) {
                        keys.push(record.key);
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::content_key;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        assert!(store.get("queue:pending").await.unwrap().is_none());
        store
            .set("queue:pending", r#"[{"id":"a"}]"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get("queue:pending").await.unwrap().as_deref(),
            Some(r#"[{"id":"a"}]"#)
        );
    }

    #[tokio::test]
    async fn test_keys_with_separators_are_safe() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let key = "cache:/meals?date=2024-01-01&user=../../etc";
        store.set(key, "{}".to_string()).await.unwrap();

        let keys = store.list_keys("cache:").await.unwrap();
        assert_eq!(keys, vec![key.to_string()]);
    }

    #[tokio::test]
    async fn test_long_content_keys_are_stored() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();

        let derived = content_key(
            "analyze-meal",
            b"img",
            "firstname.lastname@example.com",
            &[("prompt", "estimate")],
        );
        let key = format!("cache:{}", derived.key);
        let very_long = format!("cache:{}", "x".repeat(4096));
        assert!(key.len() > 130);

        store.set(&key, "{\"kcal\":300}".to_string()).await.unwrap();
        store.set(&very_long, "1".to_string()).await.unwrap();

        assert_eq!(
            store.get(&key).await.unwrap().as_deref(),
            Some("{\"kcal\":300}")
        );
        let mut expected = vec![key.clone(), very_long.clone()];
        expected.sort();
        assert_eq!(store.list_keys("cache:").await.unwrap(), expected);

        store.remove(&very_long).await.unwrap();
        assert!(store.get(&very_long).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        store.set("a", "1".to_string()).await.unwrap();
        store.set("a", "2".to_string()).await.unwrap();

        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .count();
        assert_eq!(leftovers, 0);
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        fs::write(record_path(temp_dir.path(), "k"), "{broken").unwrap();

        assert!(matches!(
            store.get("k").await,
            Err(StorageError::CorruptRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("records")).unwrap();
        store.remove("never-written").await.unwrap();
    }
}
