use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
    access_count: u64,
}

/// Bounded, TTL-based cache keyed by tracked path.
///
/// Expiry is lazy (checked on read). When full, the entry with the lowest
/// raw `access_count` is evicted, ties broken by insertion order. This is
/// frequency-based, not recency-based: a long-lived hot entry is never the
/// victim, even if it has not been read recently. Every hit increments the
/// count and can itself change the next eviction victim.
pub struct SizeCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
    seq: AtomicU64,
}

impl<V: Clone> SizeCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            seq: AtomicU64::new(0),
        }
    }

    /// Fetch a value, counting the hit. Expired entries are dropped and
    /// reported as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() > self.ttl {
                entries.remove(key);
                tracing::debug!(key = %key, "size cache entry expired");
                return None;
            }
        }
        entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.value.clone()
        })
    }

    /// Insert or replace a value. Replacing resets the entry's age and hit
    /// count; inserting at capacity evicts the least-frequently-used entry
    /// first.
    pub fn set(&self, key: &str, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.seq))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                tracing::debug!(key = %victim, "evicted size cache entry");
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                access_count: 0,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_miss_returns_none() {
        let cache: SizeCache<u64> = SizeCache::new(10, Duration::from_secs(60));
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = SizeCache::new(10, Duration::from_secs(60));
        cache.set("a", 42u64);
        assert_eq!(cache.get("a"), Some(42));
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = SizeCache::new(10, Duration::from_millis(20));
        cache.set("a", 1u64);
        thread::sleep(Duration::from_millis(40));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_picks_least_frequently_used() {
        let cache = SizeCache::new(2, Duration::from_secs(60));
        cache.set("a", 1u64);
        cache.set("b", 2u64);
        // One hit on "a" makes "b" the victim despite being newer.
        cache.get("a");
        cache.set("c", 3u64);

        assert_eq!(cache.get("a"), Some(1));
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn eviction_ties_break_by_insertion_order() {
        let cache = SizeCache::new(2, Duration::from_secs(60));
        cache.set("first", 1u64);
        cache.set("second", 2u64);
        cache.set("third", 3u64);

        assert!(cache.get("first").is_none());
        assert_eq!(cache.get("second"), Some(2));
        assert_eq!(cache.get("third"), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache = SizeCache::new(2, Duration::from_secs(60));
        cache.set("a", 1u64);
        cache.set("b", 2u64);
        cache.set("a", 10u64);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn delete_and_clear() {
        let cache = SizeCache::new(10, Duration::from_secs(60));
        cache.set("a", 1u64);
        cache.set("b", 2u64);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
