//! Fixed-capacity LRU response cache shared across connections.
//!
//! The recency list lives inside a single `Mutex`, so every `get` and `put`
//! from every connection task is serialized. The lock is never held across
//! an `.await`. Cache keys are the hex SHA-256 digest of the request's
//! canonical JSON (see [`crate::protocol::canonical_json`]).

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, WireError};
use crate::protocol::canonical_json;

/// Build the cache key for a request envelope.
///
/// Field order inside the envelope does not affect the key.
pub fn cache_key(request: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(request).as_bytes());
    hex::encode(hasher.finalize())
}

/// Thread-safe LRU cache with hit/miss accounting.
pub struct ResponseCache<V> {
    entries: Mutex<LruCache<String, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache from a plain size, rejecting zero.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or_else(|| WireError::Config("cache capacity must be at least 1".to_string()))
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.lock("get").get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert or overwrite `key`, marking it most recently used.
    ///
    /// When the insert pushes the cache over capacity exactly one entry, the
    /// least recently used, is evicted.
    pub fn put(&self, key: String, value: V) {
        let displaced = self.lock("put").push(key.clone(), value);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %&old_key[..8.min(old_key.len())], "Evicting LRU cache entry");
            }
        }
    }

    /// Return aggregate statistics about the cache.
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock("stats");
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        self.lock("clear").clear();
    }

    /// Return the number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    /// Return `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock("capacity").cap().get()
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<String, V>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    result = "poisoned_recovered",
                    "Recovered from poisoned cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed to make room for new ones.
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn test_cache(capacity: usize) -> ResponseCache<String> {
        ResponseCache::with_capacity(capacity).unwrap()
    }

    #[test]
    fn test_cache_key_deterministic() {
        let req = json!({"mode": "calc", "data": {"expr": "1+1"}});
        assert_eq!(cache_key(&req), cache_key(&req.clone()));
        assert_eq!(cache_key(&req).len(), 64);
    }

    #[test]
    fn test_cache_key_field_order_independent() {
        let a: Value = serde_json::from_str(
            r#"{"mode":"calc","data":{"expr":"sin(0)","note":"x"},"options":{"cache":true}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"options":{"cache":true},"data":{"note":"x","expr":"sin(0)"},"mode":"calc"}"#,
        )
        .unwrap();
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn test_cache_key_request_aware() {
        let k1 = cache_key(&json!({"mode": "calc", "data": {"expr": "1+1"}}));
        let k2 = cache_key(&json!({"mode": "calc", "data": {"expr": "1+2"}}));
        let k3 = cache_key(&json!({"mode": "generate", "data": {"expr": "1+1"}}));
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = test_cache(4);
        assert!(cache.get("k").is_none());
        cache.put("k".into(), "v".into());
        assert_eq!(cache.get("k"), Some("v".into()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let cache = test_cache(3);
        for i in 0..3 {
            cache.put(format!("k{i}"), format!("v{i}"));
        }
        cache.put("k3".into(), "v3".into());
        assert!(cache.get("k0").is_none(), "k0 was least recently used");
        assert_eq!(cache.len(), 3);
        for i in 1..4 {
            assert!(cache.get(&format!("k{i}")).is_some());
        }
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = test_cache(3);
        for i in 0..3 {
            cache.put(format!("k{i}"), format!("v{i}"));
        }
        // Touch k0 so k1 becomes the LRU entry.
        assert!(cache.get("k0").is_some());
        cache.put("k3".into(), "v3".into());
        assert!(cache.get("k0").is_some());
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
    }

    #[test]
    fn test_overwrite_refreshes_without_eviction() {
        let cache = test_cache(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        cache.put("a".into(), "3".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        // `a` is now MRU, so `b` goes first.
        cache.put("c".into(), "4".into());
        assert_eq!(cache.get("a"), Some("3".into()));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_capacity_one() {
        let cache = test_cache(1);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some("2".into()));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ResponseCache::<String>::with_capacity(0),
            Err(WireError::Config(_))
        ));
    }

    #[test]
    fn test_clear_and_len() {
        let cache = test_cache(4);
        assert!(cache.is_empty());
        cache.put("a".into(), "b".into());
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    fn test_concurrent_access_never_exceeds_capacity() {
        let cache = Arc::new(test_cache(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{t}-k{}", i % 40);
                        if cache.get(&key).is_none() {
                            cache.put(key, format!("{i}"));
                        }
                        assert!(cache.len() <= 16);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 16);
        assert_eq!(stats.hits + stats.misses, 8 * 500);
    }
}
