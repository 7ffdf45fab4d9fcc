//! TTL + content-hash response cache

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::clock::Clock;
use crate::storage::{get_json, set_json, DurableStore, StorageError, StorageResult};
use crate::transport::TransportError;

const KEY_PREFIX: &str = "cache:";

/// Where a [`Cached`] value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Fetched just now
    Network,
    /// Fresh cache hit
    Cache,
    /// Expired entry served because the refetch could not reach the server
    Stale,
}

/// A value together with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub source: CacheSource,
    pub cached_at: Option<DateTime<Utc>>,
}

/// Summary of the cache contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub expired: usize,
    pub hashed: usize,
}

enum Lookup {
    Hit(CacheEntry),
    Expired(CacheEntry),
    HashMismatch,
    Miss,
}

/// Read-through cache over a [`DurableStore`]
///
/// Expiry is passive: an expired or hash-mismatched entry is removed when a
/// read finds it, and nothing sweeps in the background.
pub struct ResponseCache {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    write_lock: Mutex<()>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            default_ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh value for `key`, if any
    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.get_with_hash(key, None).await
    }

    /// Fresh value for `key` whose recorded hash matches `source_hash`
    pub async fn get_with_hash(
        &self,
        key: &str,
        source_hash: Option<&str>,
    ) -> StorageResult<Option<Value>> {
        match self.lookup(key, source_hash).await? {
            Lookup::Hit(entry) => Ok(Some(entry.value)),
            Lookup::Expired(entry) => {
                self.evict_if_unchanged(&entry).await?;
                Ok(None)
            }
            Lookup::HashMismatch | Lookup::Miss => Ok(None),
        }
    }

    /// Store `value`, replacing any previous entry
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        source_hash: Option<String>,
    ) -> StorageResult<()> {
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl, source_hash);
        let _guard = self.write_lock.lock().await;
        set_json(self.store.as_ref(), &storage_key(key), &entry).await?;
        debug!("Cached {} (ttl {:?})", key, ttl);
        Ok(())
    }

    /// Return the cached value or compute, store and return a new one
    ///
    /// On a miss `compute` runs exactly once and its error is returned as-is.
    /// Concurrent misses for the same key each compute.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        source_hash: Option<&str>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get_with_hash(key, source_hash).await? {
            match serde_json::from_value(value) {
                Ok(hit) => return Ok(hit),
                Err(e) => debug!("Cached value for {} has a different shape: {}", key, e),
            }
        }

        let computed = compute().await?;
        let value = serde_json::to_value(&computed)
            .with_context(|| format!("Failed to encode computed value for {}", key))?;
        if let Err(e) = self
            .set(key, value, ttl, source_hash.map(str::to_string))
            .await
        {
            warn!("Computed {} but could not cache it: {}", key, e);
        }
        Ok(computed)
    }

    /// Read-through fetch that may serve an expired entry when offline
    ///
    /// A fresh entry is returned without calling `fetcher`. Otherwise the
    /// fetched value is cached and returned. If the fetch fails with a
    /// [`TransportError`] that permits it and an expired entry exists, that
    /// entry is returned as [`CacheSource::Stale`].
    pub async fn fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let stale = match self.lookup(key, None).await? {
            Lookup::Hit(entry) => {
                let created_at = entry.created_at;
                match serde_json::from_value(entry.value) {
                    Ok(value) => {
                        return Ok(Cached {
                            value,
                            source: CacheSource::Cache,
                            cached_at: Some(created_at),
                        })
                    }
                    Err(e) => {
                        debug!("Cached value for {} has a different shape: {}", key, e);
                        None
                    }
                }
            }
            Lookup::Expired(entry) => Some(entry),
            Lookup::HashMismatch | Lookup::Miss => None,
        };

        match fetcher().await {
            Ok(value) => {
                let raw = serde_json::to_value(&value)
                    .with_context(|| format!("Failed to encode fetched value for {}", key))?;
                self.set(key, raw, ttl, None).await?;
                Ok(Cached {
                    value,
                    source: CacheSource::Network,
                    cached_at: None,
                })
            }
            Err(error) => {
                let fallback = error
                    .downcast_ref::<TransportError>()
                    .is_some_and(TransportError::allows_stale_fallback);
                let Some(entry) = stale.filter(|_| fallback) else {
                    return Err(error);
                };
                let created_at = entry.created_at;
                let value = serde_json::from_value(entry.value)
                    .with_context(|| format!("Stale entry for {} has a different shape", key))?;
                warn!(
                    "Serving stale {} from {} after fetch failed: {}",
                    key, created_at, error
                );
                Ok(Cached {
                    value,
                    source: CacheSource::Stale,
                    cached_at: Some(created_at),
                })
            }
        }
    }

    /// Remove every entry whose key contains `pattern`
    ///
    /// Exact keys and prefixes are both substrings, so either works. An
    /// empty pattern removes nothing; use [`clear`](Self::clear) for that.
    pub async fn invalidate(&self, pattern: &str) -> StorageResult<usize> {
        if pattern.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for stored in self.store.list_keys(KEY_PREFIX).await? {
            let key = &stored[KEY_PREFIX.len()..];
            if key.contains(pattern) {
                self.store.remove(&stored).await?;
                removed += 1;
            }
        }
        debug!("Invalidated {} entr(ies) matching {:?}", removed, pattern);
        Ok(removed)
    }

    /// Remove every cached entry
    pub async fn clear(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().await;
        let keys = self.store.list_keys(KEY_PREFIX).await?;
        for stored in &keys {
            self.store.remove(stored).await?;
        }
        Ok(keys.len())
    }

    /// Logical keys currently stored, fresh or not
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .store
            .list_keys(KEY_PREFIX)
            .await?
            .into_iter()
            .map(|k| k[KEY_PREFIX.len()..].to_string())
            .collect())
    }

    pub async fn stats(&self) -> StorageResult<CacheStats> {
        let now = self.clock.now();
        let mut stats = CacheStats::default();
        for stored in self.store.list_keys(KEY_PREFIX).await? {
            let entry: Option<CacheEntry> = match get_json(self.store.as_ref(), &stored).await {
                Ok(entry) => entry,
                Err(StorageError::CorruptRecord { .. }) => None,
                Err(e) => return Err(e),
            };
            let Some(entry) = entry else {
                continue;
            };
            stats.entries += 1;
            if entry.is_fresh(now) {
                stats.fresh += 1;
            } else {
                stats.expired += 1;
            }
            if entry.source_hash.is_some() {
                stats.hashed += 1;
            }
        }
        Ok(stats)
    }

    async fn lookup(&self, key: &str, source_hash: Option<&str>) -> StorageResult<Lookup> {
        let stored = storage_key(key);
        let entry: CacheEntry = match get_json(self.store.as_ref(), &stored).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("Cache miss: {}", key);
                return Ok(Lookup::Miss);
            }
            Err(StorageError::CorruptRecord { details, .. }) => {
                warn!("Dropping unreadable cache entry {}: {}", key, details);
                let _guard = self.write_lock.lock().await;
                self.store.remove(&stored).await?;
                return Ok(Lookup::Miss);
            }
            Err(e) => return Err(e),
        };

        if !entry.is_fresh(self.clock.now()) {
            debug!("Cache expired: {}", key);
            return Ok(Lookup::Expired(entry));
        }

        if !entry.matches_hash(source_hash) {
            debug!("Cache hash mismatch: {}", key);
            let _guard = self.write_lock.lock().await;
            self.store.remove(&stored).await?;
            return Ok(Lookup::HashMismatch);
        }

        debug!("Cache hit: {}", key);
        Ok(Lookup::Hit(entry))
    }

    /// Remove an expired entry unless it was rewritten since it was read
    async fn evict_if_unchanged(&self, seen: &CacheEntry) -> StorageResult<()> {
        let stored = storage_key(&seen.key);
        let _guard = self.write_lock.lock().await;
        let current: Option<CacheEntry> = get_json(self.store.as_ref(), &stored).await.ok().flatten();
        if current.is_some_and(|c| c.created_at == seen.created_at) {
            self.store.remove(&stored).await?;
        }
        Ok(())
    }
}

fn storage_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}
