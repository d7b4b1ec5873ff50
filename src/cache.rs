//! Bounded in-memory caches
//!
//! Two flavors back the engine's working set: `TtlCache` (capacity bound plus
//! per-entry time-to-live) for instrument tokens and ticks, and `LruCache`
//! (capacity bound with least-recently-used eviction) for live orders.
//!
//! Neither cache is a system of record. An expired entry is treated as absent
//! by every reader even before the janitor's periodic `expire` sweep removes
//! it.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Capacity-bounded cache whose entries expire after a fixed time-to-live.
pub struct TtlCache<K, V> {
    map: HashMap<K, TtlEntry<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            map: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Returns the live value for `key`. An entry past its deadline is
    /// reported absent even if the sweep has not removed it yet.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| &entry.value)
    }

    /// Inserts `value`, evicting the entry closest to expiry when full.
    pub fn put(&mut self, key: K, value: V) {
        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            self.evict_one();
        }
        self.map.insert(
            key,
            TtlEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|entry| entry.value)
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn expire(&mut self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at > now);
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn evict_one(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }
}

struct LruEntry<V> {
    value: V,
    used_at: u64,
}

/// Capacity-bounded cache evicting the least-recently-used entry when full.
pub struct LruCache<K, V> {
    map: HashMap<K, LruEntry<V>>,
    capacity: usize,
    clock: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            map: HashMap::new(),
            capacity,
            clock: 0,
        }
    }

    /// Returns the value for `key`, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.clock += 1;
        let clock = self.clock;
        self.map.get_mut(key).map(|entry| {
            entry.used_at = clock;
            &entry.value
        })
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.clock += 1;
        let clock = self.clock;
        self.map.get_mut(key).map(|entry| {
            entry.used_at = clock;
            &mut entry.value
        })
    }

    /// Membership test without touching recency.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn put(&mut self, key: K, value: V) {
        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            self.evict_one();
        }
        self.clock += 1;
        self.map.insert(
            key,
            LruEntry {
                value,
                used_at: self.clock,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter().map(|(key, entry)| (key, &entry.value))
    }

    fn evict_one(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.used_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_ttl_entry_expires_before_sweep() {
        let mut cache = TtlCache::new(10, Duration::from_millis(20));
        cache.put("RELIANCE", 738561u32);
        assert_eq!(cache.get(&"RELIANCE"), Some(&738561));

        sleep(Duration::from_millis(30));

        // Not swept yet, but readers must see it as absent.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"RELIANCE"), None);
    }

    #[test]
    fn test_ttl_sweep_removes_expired_entries() {
        let mut cache = TtlCache::new(10, Duration::from_millis(10));
        cache.put(1u32, 100.0);
        cache.put(2u32, 200.0);
        sleep(Duration::from_millis(20));
        cache.put(3u32, 300.0);

        assert_eq!(cache.expire(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&3), Some(&300.0));
    }

    #[test]
    fn test_ttl_capacity_evicts_oldest() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.put("A", 1);
        sleep(Duration::from_millis(5));
        cache.put("B", 2);
        cache.put("C", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"A"), None);
        assert_eq!(cache.get(&"B"), Some(&2));
        assert_eq!(cache.get(&"C"), Some(&3));
    }

    #[test]
    fn test_ttl_put_refreshes_existing_key() {
        let mut cache = TtlCache::new(1, Duration::from_secs(60));
        cache.put("A", 1);
        cache.put("A", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"A"), Some(&2));
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put(1u64, "first");
        cache.put(2u64, "second");

        // Touch 1 so that 2 becomes the eviction candidate.
        assert_eq!(cache.get(&1), Some(&"first"));
        cache.put(3u64, "third");

        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&3));
    }

    #[test]
    fn test_lru_remove() {
        let mut cache = LruCache::new(4);
        cache.put(7u64, "x");
        assert_eq!(cache.remove(&7), Some("x"));
        assert_eq!(cache.remove(&7), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_contains_does_not_refresh() {
        let mut cache = LruCache::new(2);
        cache.put(1u64, "first");
        cache.put(2u64, "second");

        // A membership probe must not rescue 1 from eviction.
        assert!(cache.contains_key(&1));
        cache.put(3u64, "third");
        assert!(!cache.contains_key(&1));
    }
}
