//! Response cache storage.
//!
//! One `RwLock` guards the whole map: lookups share the read side, insert,
//! eviction and lazy expiry take the write side.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::lock::{read_or_recover, write_or_recover};

const SOURCE: &str = "cache::store";

/// Captured upstream response. Never mutated after it is stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: Instant,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Instant::now(),
        }
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        self.age_at(now) <= ttl
    }
}

/// Bounded TTL cache of upstream responses keyed by request fingerprint.
pub struct ResponseStore {
    ttl: Duration,
    max_entries: NonZeroUsize,
    entries: RwLock<HashMap<String, CachedResponse>>,
}

impl ResponseStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.response_ttl(),
            max_entries: config.response_max_entries_non_zero(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<CachedResponse> {
        self.lookup_at(key, Instant::now())
    }

    /// Return a live entry, or drop a stale one and report a miss.
    pub fn lookup_at(&self, key: &str, now: Instant) -> Option<CachedResponse> {
        let entry = read_or_recover(&self.entries, SOURCE, "lookup")
            .get(key)
            .cloned()?;

        if entry.is_fresh_at(now, self.ttl) {
            return Some(entry);
        }

        let mut entries = write_or_recover(&self.entries, SOURCE, "lookup.expire");
        // A concurrent store may have refreshed the key between the two locks.
        if entries
            .get(key)
            .is_some_and(|current| !current.is_fresh_at(now, self.ttl))
        {
            entries.remove(key);
            debug!(cache = "response", key, "expired entry removed");
        }
        None
    }

    /// Insert an entry, evicting the oldest one first when at capacity.
    ///
    /// Returns the evicted key, if any. Replacing an existing key never evicts.
    pub fn store(&self, key: String, response: CachedResponse) -> Option<String> {
        let mut entries = write_or_recover(&self.entries, SOURCE, "store");

        let mut evicted = None;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries.get() {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(oldest, _)| oldest.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                counter!("tollgate_response_cache_evict_total").increment(1);
                evicted = Some(oldest);
            }
        }

        entries.insert(key, response);
        evicted
    }

    pub fn contains(&self, key: &str) -> bool {
        read_or_recover(&self.entries, SOURCE, "contains").contains_key(key)
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn config(max_entries: usize, ttl_seconds: u64) -> CacheConfig {
        CacheConfig {
            response_max_entries: max_entries,
            response_ttl_seconds: ttl_seconds,
            ..Default::default()
        }
    }

    fn response_at(body: &'static str, stored_at: Instant) -> CachedResponse {
        CachedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            stored_at,
        }
    }

    #[test]
    fn store_then_lookup_returns_entry() {
        let store = ResponseStore::new(&CacheConfig::default());
        assert!(store.lookup("k").is_none());

        let evicted = store.store(
            "k".to_string(),
            CachedResponse::new(
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from_static(b"hello"),
            ),
        );
        assert!(evicted.is_none());

        let cached = store.lookup("k").expect("cached response");
        assert_eq!(cached.status, StatusCode::OK);
        assert_eq!(cached.body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn stale_entry_is_removed_on_lookup() {
        let store = ResponseStore::new(&config(8, 5));
        let stored_at = Instant::now();
        store.store("k".to_string(), response_at("v", stored_at));

        let at_ttl = stored_at + Duration::from_secs(5);
        let past_ttl = stored_at + Duration::from_secs(6);
        assert!(store.lookup_at("k", at_ttl).is_some());
        assert!(store.lookup_at("k", past_ttl).is_none());
        assert!(!store.contains("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn eviction_removes_oldest_entry() {
        let store = ResponseStore::new(&config(2, 60));
        let base = Instant::now();
        let later = |ms| base + Duration::from_millis(ms);
        store.store("newer".to_string(), response_at("b", later(10)));
        store.store("older".to_string(), response_at("a", base));

        let evicted = store.store("newest".to_string(), response_at("c", later(20)));

        assert_eq!(evicted.as_deref(), Some("older"));
        assert_eq!(store.len(), 2);
        assert!(store.contains("newer"));
        assert!(store.contains("newest"));
    }

    #[test]
    fn size_never_exceeds_limit() {
        let store = ResponseStore::new(&config(3, 60));
        let base = Instant::now();
        for i in 0..10u64 {
            let stored_at = base + Duration::from_millis(i);
            store.store(format!("k{i}"), response_at("x", stored_at));
            assert!(store.len() <= 3);
        }
        assert!(store.contains("k9"));
        assert!(!store.contains("k0"));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let store = ResponseStore::new(&config(2, 60));
        let base = Instant::now();
        let later = |ms| base + Duration::from_millis(ms);
        store.store("a".to_string(), response_at("1", base));
        store.store("b".to_string(), response_at("2", later(1)));

        let evicted = store.store("a".to_string(), response_at("3", later(2)));

        assert!(evicted.is_none());
        assert_eq!(store.len(), 2);
        let replaced = store.lookup("a").expect("replaced");
        assert_eq!(replaced.body, Bytes::from_static(b"3"));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = ResponseStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock");
            panic!("poison entries lock");
        }));

        store.store("k".to_string(), response_at("v", Instant::now()));
        assert!(store.lookup("k").is_some());
    }
}
