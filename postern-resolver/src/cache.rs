//! Bounded, time-limited memo of recent verdicts
//!
//! Entries carry the configuration generation they were computed against.
//! Looking an entry up with a different generation is a miss and drops the
//! entry, so a reload invalidates the whole cache lazily.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::Mutex;
use postern_common::{Address, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    address: String,
    hint: Option<String>,
}

impl CacheKey {
    pub fn new(address: &Address, hint: Option<&str>) -> Self {
        Self {
            address: address.to_string(),
            hint: hint.map(str::to_string),
        }
    }
}

#[derive(Debug)]
struct Entry {
    verdict: Verdict,
    created: Instant,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a verdict computed against `generation`.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<Verdict> {
        self.get_at(key, generation, Instant::now())
    }

    fn get_at(&self, key: &CacheKey, generation: u64, now: Instant) -> Option<Verdict> {
        let mut entries = self.entries.lock();

        let lookup = entries.get(key).map(|entry| {
            let fresh = entry.generation == generation
                && now.saturating_duration_since(entry.created) < self.ttl;
            fresh.then(|| entry.verdict.clone())
        });

        let verdict = match lookup {
            Some(Some(verdict)) => Some(verdict),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        };
        drop(entries);

        let counter = if verdict.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        verdict
    }

    /// Remember `verdict`. Deferred verdicts are never stored.
    pub fn put(&self, key: CacheKey, generation: u64, verdict: Verdict) {
        self.put_at(key, generation, verdict, Instant::now());
    }

    fn put_at(&self, key: CacheKey, generation: u64, verdict: Verdict, created: Instant) {
        if verdict.is_deferred() {
            return;
        }

        self.entries.lock().put(
            key,
            Entry {
                verdict,
                created,
                generation,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(&Address::parse(raw, false).unwrap(), None)
    }

    fn cache(capacity: usize) -> QueryCache {
        QueryCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = cache(4);
        assert!(cache.get(&key("a@example.com"), 1).is_none());

        cache.put(key("a@example.com"), 1, Verdict::deliverable());
        assert_eq!(
            cache.get(&key("A@Example.COM"), 1),
            Some(Verdict::deliverable())
        );

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_hint_is_part_of_the_key() {
        let cache = cache(4);
        let address = Address::parse("a@example.com", false).unwrap();
        cache.put(CacheKey::new(&address, Some("hub-b")), 1, Verdict::deliverable());
        assert!(cache.get(&CacheKey::new(&address, None), 1).is_none());
        assert!(cache.get(&CacheKey::new(&address, Some("hub-b")), 1).is_some());
    }

    #[test]
    fn test_generation_mismatch_evicts() {
        let cache = cache(4);
        cache.put(key("a@example.com"), 1, Verdict::deliverable());

        assert!(cache.get(&key("a@example.com"), 2).is_none());
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.get(&key("a@example.com"), 1).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(4);
        let start = Instant::now();
        cache.put_at(key("a@example.com"), 1, Verdict::undeliverable(), start);

        assert!(
            cache
                .get_at(&key("a@example.com"), 1, start + Duration::from_secs(59))
                .is_some()
        );
        assert!(
            cache
                .get_at(&key("a@example.com"), 1, start + Duration::from_secs(60))
                .is_none()
        );
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_deferred_is_not_cached() {
        let cache = cache(4);
        cache.put(key("a@example.com"), 1, Verdict::deferred("backend-timeout"));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_capacity_bound_evicts_least_recent() {
        let cache = cache(2);
        cache.put(key("a@example.com"), 1, Verdict::deliverable());
        cache.put(key("b@example.com"), 1, Verdict::deliverable());
        assert!(cache.get(&key("a@example.com"), 1).is_some());
        cache.put(key("c@example.com"), 1, Verdict::deliverable());

        assert!(cache.get(&key("b@example.com"), 1).is_none());
        assert!(cache.get(&key("a@example.com"), 1).is_some());
        assert_eq!(cache.stats().capacity, 2);
    }

    #[test]
    fn test_clear() {
        let cache = cache(2);
        cache.put(key("a@example.com"), 1, Verdict::deliverable());
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
