//! In-memory payload cache with LRU eviction and byte-cost accounting.

use bytes::Bytes;
use lru::LruCache;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use bridge_traits::decoder::DecodedResource;
use core_runtime::events::{EventBus, LoaderEvent};

use crate::record::StoreRecord;

/// A cached payload: raw bytes plus the decoded form when one was produced.
#[derive(Clone)]
pub struct CachedPayload {
    pub bytes: Bytes,
    pub decoded: Option<Arc<dyn DecodedResource>>,
    /// Unix timestamp (milliseconds) after which the entry is stale,
    /// mirroring the persisted record's expiry.
    pub expires_at: Option<i64>,
}

impl CachedPayload {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            decoded: None,
            expires_at: None,
        }
    }

    pub fn with_decoded(mut self, decoded: Arc<dyn DecodedResource>) -> Self {
        self.decoded = Some(decoded);
        self
    }

    /// Carry over the expiry of the persisted record this payload came from.
    pub fn with_record_expiry(mut self, record: &StoreRecord) -> Self {
        self.expires_at = record.expires_at;
        self
    }

    fn cost(&self) -> usize {
        self.bytes.len()
    }

    fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }
}

impl std::fmt::Debug for CachedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPayload")
            .field("bytes", &self.bytes.len())
            .field("decoded", &self.decoded.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct MemoryStoreInner {
    cache: LruCache<String, CachedPayload>,
    current_bytes: usize,
}

/// LRU memory cache bounded by total payload bytes rather than entry count.
///
/// Inserting a payload larger than the budget is a no-op. Evictions are
/// announced on the event bus when one is attached.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    max_bytes: usize,
    event_bus: Option<EventBus>,
}

impl MemoryStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                // The byte budget is the real bound, enforced in put().
                cache: LruCache::unbounded(),
                current_bytes: 0,
            }),
            max_bytes,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Fetch a payload, promoting it to most-recently-used.
    ///
    /// Expired entries are dropped during the lookup and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CachedPayload> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut inner = self.inner.write().await;

        let expired = matches!(inner.cache.peek(key), Some(payload) if payload.is_expired_at(now));
        if expired {
            if let Some(payload) = inner.cache.pop(key) {
                inner.current_bytes -= payload.cost();
                self.emit_expired(key);
            }
            return None;
        }

        inner.cache.get(key).cloned()
    }

    /// Insert a payload, evicting least-recently-used entries until the
    /// byte budget holds.
    pub async fn put(&self, key: impl Into<String>, payload: CachedPayload) {
        let key = key.into();
        let cost = payload.cost();
        if cost > self.max_bytes {
            debug!(key = %key, bytes = cost, "Payload exceeds memory cache budget, skipping");
            return;
        }

        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.cache.pop(&key) {
            inner.current_bytes -= previous.cost();
        }

        while inner.current_bytes + cost > self.max_bytes {
            match inner.cache.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.current_bytes -= evicted.cost();
                    debug!(key = %evicted_key, bytes = evicted.cost(), "Evicted payload from memory cache");
                    if let Some(bus) = &self.event_bus {
                        bus.emit(LoaderEvent::CacheEvicted {
                            key: evicted_key,
                            bytes: evicted.cost() as u64,
                        })
                        .ok();
                    }
                }
                None => break,
            }
        }

        inner.current_bytes += cost;
        inner.cache.put(key, payload);
    }

    /// Remove one entry.
    pub async fn remove(&self, key: &str) {
        let mut inner = self.inner.write().await;
        if let Some(payload) = inner.cache.pop(key) {
            inner.current_bytes -= payload.cost();
        }
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.cache.clear();
        inner.current_bytes = 0;
    }

    /// Total bytes currently held.
    pub async fn current_bytes(&self) -> usize {
        self.inner.read().await.current_bytes
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.cache.is_empty()
    }

    fn emit_expired(&self, key: &str) {
        if let Some(bus) = &self.event_bus {
            bus.emit(LoaderEvent::RecordExpired {
                key: key.to_string(),
            })
            .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> CachedPayload {
        CachedPayload::new(Bytes::from(vec![0u8; len]))
    }

    #[tokio::test]
    async fn test_get_returns_inserted_payload() {
        let store = MemoryStore::new(1024);
        store.put("a", payload(100)).await;

        let cached = store.get("a").await.unwrap();
        assert_eq!(cached.bytes.len(), 100);
        assert_eq!(store.current_bytes().await, 100);
    }

    #[tokio::test]
    async fn test_lru_eviction_under_byte_pressure() {
        let store = MemoryStore::new(250);
        store.put("a", payload(100)).await;
        store.put("b", payload(100)).await;

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(store.get("a").await.is_some());

        store.put("c", payload(100)).await;

        assert!(store.get("a").await.is_some());
        assert!(store.get("b").await.is_none());
        assert!(store.get("c").await.is_some());
        assert_eq!(store.current_bytes().await, 200);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_skipped() {
        let store = MemoryStore::new(50);
        store.put("big", payload(100)).await;

        assert!(store.get("big").await.is_none());
        assert_eq!(store.current_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_replacing_key_adjusts_accounting() {
        let store = MemoryStore::new(1024);
        store.put("a", payload(100)).await;
        store.put("a", payload(40)).await;

        assert_eq!(store.current_bytes().await, 40);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let store = MemoryStore::new(1024);
        let mut expired = payload(10);
        expired.expires_at = Some(chrono::Utc::now().timestamp_millis() - 10);
        store.put("a", expired).await;

        assert!(store.get("a").await.is_none());
        assert_eq!(store.current_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_accounting() {
        let store = MemoryStore::new(1024);
        store.put("a", payload(100)).await;
        store.put("b", payload(100)).await;

        store.clear().await;

        assert!(store.is_empty().await);
        assert_eq!(store.current_bytes().await, 0);
    }
}
