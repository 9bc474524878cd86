//! Persisted record model: one row per resource key, pointing at a backing
//! file in the store directory.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A persisted key → file mapping with creation time and optional expiry.
///
/// Owned by the record store; one record per key, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoreRecord {
    /// Canonical resource key.
    pub key: String,
    /// File name relative to the store directory.
    pub file_name: String,
    /// Unix timestamp (milliseconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) after which the record is expired.
    /// Millisecond resolution keeps sub-second TTLs meaningful.
    pub expires_at: Option<i64>,
    /// Original URL the payload was fetched from, when known.
    pub original_url: Option<String>,
    /// Serialized response metadata (headers, status), when captured.
    pub response_meta: Option<String>,
}

impl StoreRecord {
    /// Build a record for `key`, deriving the backing file name from the key.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let file_name = file_name_for_key(&key);
        Self {
            key,
            file_name,
            created_at: Utc::now().timestamp_millis(),
            expires_at: None,
            original_url: None,
            response_meta: None,
        }
    }

    /// Attach an expiry as a TTL from now.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        self
    }

    /// Attach an absolute expiry timestamp.
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Record the original URL.
    pub fn with_original_url(mut self, url: impl Into<String>) -> Self {
        self.original_url = Some(url.into());
        self
    }

    /// Record serialized response metadata.
    pub fn with_response_meta(mut self, meta: impl Into<String>) -> Self {
        self.response_meta = Some(meta.into());
        self
    }

    /// Whether the record is expired at `now` (unix milliseconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }

    /// Whether the record is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }
}

/// Derive a stable backing file name from a key.
///
/// SHA-256 keeps arbitrary keys (URLs with slashes, query strings) safe as
/// file names and makes collisions a non-concern.
pub fn file_name_for_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}.bin", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_stable_and_safe() {
        let a = file_name_for_key("https://example.com/a.png?size=2x");
        let b = file_name_for_key("https://example.com/a.png?size=2x");
        assert_eq!(a, b);
        assert!(a.ends_with(".bin"));
        assert!(!a.contains('/'));
        assert_ne!(a, file_name_for_key("https://example.com/b.png"));
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now().timestamp_millis();

        let fresh = StoreRecord::new("k").with_expires_at(now + 60_000);
        assert!(!fresh.is_expired_at(now));

        let stale = StoreRecord::new("k").with_expires_at(now - 1);
        assert!(stale.is_expired_at(now));

        let eternal = StoreRecord::new("k");
        assert!(!eternal.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_ttl_builder() {
        let record = StoreRecord::new("k").with_ttl(Duration::from_secs(3600));
        let expires_at = record.expires_at.unwrap();
        assert!(expires_at > Utc::now().timestamp_millis() + 3_500_000);
    }
}
