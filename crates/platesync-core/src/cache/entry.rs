use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    #[serde(rename = "created_at_ms", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        created_at: DateTime<Utc>,
        ttl: std::time::Duration,
        source_hash: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            source_hash,
        }
    }

    /// Fresh while `now - created_at < ttl`; an entry is stale exactly at the TTL
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.created_at).num_milliseconds();
        age < i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }

    /// Whether `current` agrees with the hash recorded at write time
    ///
    /// Entries written without a hash, and lookups that supply none, always
    /// match.
    pub fn matches_hash(&self, current: Option<&str>) -> bool {
        match (self.source_hash.as_deref(), current) {
            (Some(stored), Some(current)) => stored == current,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_freshness_boundary() {
        let entry = CacheEntry::new("k", json!(1), at(0), StdDuration::from_millis(1000), None);

        assert!(entry.is_fresh(at(999)));
        assert!(!entry.is_fresh(at(1000)));
        assert!(!entry.is_fresh(at(1001)));
    }

    #[test]
    fn test_hash_matching() {
        let hashed = CacheEntry::new(
            "k",
            json!(1),
            at(0),
            StdDuration::from_secs(1),
            Some("abc".into()),
        );
        assert!(hashed.matches_hash(Some("abc")));
        assert!(!hashed.matches_hash(Some("abd")));
        assert!(hashed.matches_hash(None));

        let plain = CacheEntry::new("k", json!(1), at(0), StdDuration::from_secs(1), None);
        assert!(plain.matches_hash(Some("anything")));
    }

    #[test]
    fn test_persisted_shape() {
        let entry = CacheEntry::new("k", json!({"v": 1}), at(5), StdDuration::from_secs(2), None);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["created_at_ms"], 5);
        assert_eq!(value["ttl_ms"], 2000);
        assert!(value.get("source_hash").is_none());
    }
}
