//! Sharded Map Implementation
//!
//! Concurrent hashmap split into independently locked shards, so operations
//! on unrelated keys rarely contend.
//!
//! # Design
//!
//! - Each shard has its own RwLock
//! - Power-of-2 shard count enables fast modulo via bitwise AND
//! - Entry counts are tracked atomically so `len` never takes a lock

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

/// Single shard containing a hashmap and statistics
pub struct Shard<K, V> {
    /// The hashmap for this shard
    map: RwLock<HashMap<K, V>>,
    /// Number of entries
    count: AtomicU64,
    /// Number of reads
    reads: AtomicU64,
    /// Number of writes
    writes: AtomicU64,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get read count
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Get write count
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn sync_count(&self, map: &HashMap<K, V>) {
        self.count.store(map.len() as u64, Ordering::Relaxed);
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a value from the shard
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let guard = self.map.read();
        guard.get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let guard = self.map.read();
        guard.contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();
        let old = guard.insert(key, value);
        self.sync_count(&guard);
        old
    }

    /// Remove a value, returning it if present
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();
        let removed = guard.remove(key);
        self.sync_count(&guard);
        removed
    }

    /// Remove a value only if `predicate` holds for the current value.
    ///
    /// The check and the removal happen under one write lock.
    pub fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(predicate) {
            return None;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        let removed = guard.remove(key);
        self.sync_count(&guard);
        removed
    }

    /// Keep only the entries for which `keep` returns true.
    ///
    /// Returns the number of entries removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut guard = self.map.write();
        let before = guard.len();
        guard.retain(|k, v| keep(k, v));
        let removed = before - guard.len();
        if removed > 0 {
            self.writes.fetch_add(removed as u64, Ordering::Relaxed);
        }
        self.sync_count(&guard);
        removed
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut guard = self.map.write();
        guard.clear();
        self.count.store(0, Ordering::Relaxed);
    }

    /// Get all entries (point-in-time snapshot of this shard)
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Up to `limit` entries in iteration order
    pub fn sample(&self, limit: usize) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard
            .iter()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Sharded map with a power-of-two shard count chosen at construction
pub struct ShardedMap<K, V, S = RandomState> {
    /// Shards
    shards: Box<[Shard<K, V>]>,
    /// Hasher used to route keys to shards
    hasher: S,
}

impl<K, V> ShardedMap<K, V> {
    /// Create a new sharded map. `shard_count` is rounded up to a power of two.
    pub fn new(shard_count: usize) -> Self {
        Self::with_hasher(shard_count, RandomState::new())
    }
}

impl<K, V, S> ShardedMap<K, V, S> {
    /// Create a sharded map with an explicit hasher
    pub fn with_hasher(shard_count: usize, hasher: S) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards: Vec<Shard<K, V>> = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            hasher,
        }
    }

    /// Get the shard count
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Get a specific shard by index
    pub fn shard(&self, index: usize) -> &Shard<K, V> {
        &self.shards[index]
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> ShardedMap<K, V, S> {
    /// Index of the shard that owns `key`
    #[inline]
    pub fn shard_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        (self.hasher.hash_one(key) as usize) & (self.shards.len() - 1)
    }

    #[inline]
    fn shard_for<Q>(&self, key: &Q) -> &Shard<K, V>
    where
        Q: Hash + ?Sized,
    {
        &self.shards[self.shard_index(key)]
    }

    /// Get a value
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// Check if a key exists
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).contains_key(key)
    }

    /// Insert a value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard_for(&key).insert(key, value)
    }

    /// Remove a value
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).remove(key)
    }

    /// Remove a value if the predicate holds
    pub fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        self.shard_for(key).remove_if(key, predicate)
    }

    /// Retain entries across all shards, returning how many were removed
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.shards.iter().map(|s| s.retain(&mut keep)).sum()
    }

    /// Clear all shards
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_count_rounds_to_power_of_two() {
        let map: ShardedMap<u32, u32> = ShardedMap::new(10);
        assert_eq!(map.shard_count(), 16);
        assert!(map.shard_count().is_power_of_two());

        let single: ShardedMap<u32, u32> = ShardedMap::new(0);
        assert_eq!(single.shard_count(), 1);
    }

    #[test]
    fn test_insert_get_remove() {
        let map: ShardedMap<String, u32> = ShardedMap::new(8);

        assert!(map.insert("a".to_string(), 1).is_none());
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map.get("a"), Some(2));
        assert!(map.contains_key("a"));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove("a"), Some(2));
        assert!(map.get("a").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_if_checks_current_value() {
        let map: ShardedMap<u32, u32> = ShardedMap::new(4);
        map.insert(1, 10);

        assert!(map.remove_if(&1, |v| *v == 99).is_none());
        assert_eq!(map.get(&1), Some(10));

        assert_eq!(map.remove_if(&1, |v| *v == 10), Some(10));
        assert!(map.is_empty());
        assert!(map.remove_if(&1, |_| true).is_none());
    }

    #[test]
    fn test_retain_across_shards() {
        let map: ShardedMap<u32, u32> = ShardedMap::new(8);
        for i in 0..100 {
            map.insert(i, i);
        }

        let removed = map.retain(|_, v| v % 2 == 0);
        assert_eq!(removed, 50);
        assert_eq!(map.len(), 50);
        assert!(map.get(&3).is_none());
        assert_eq!(map.get(&4), Some(4));
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let map: ShardedMap<u32, u32> = ShardedMap::new(16);
        for i in 0..1000 {
            map.insert(i, i);
        }

        let used = (0..map.shard_count())
            .filter(|i| !map.shard(*i).is_empty())
            .count();
        assert!(used > 8, "only {} shards used", used);
    }

    #[test]
    fn test_clear() {
        let map: ShardedMap<u32, u32> = ShardedMap::new(4);
        for i in 0..10 {
            map.insert(i, i);
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_sample_is_bounded() {
        let shard: Shard<u32, u32> = Shard::new();
        for i in 0..100 {
            shard.insert(i, i);
        }
        assert_eq!(shard.sample(8).len(), 8);
        assert_eq!(shard.sample(500).len(), 100);
        assert!(Shard::<u32, u32>::new().sample(4).is_empty());
    }

    #[test]
    fn test_shard_statistics() {
        let shard: Shard<u32, u32> = Shard::new();
        shard.insert(1, 1);
        shard.get(&1);
        shard.get(&2);
        assert_eq!(shard.write_count(), 1);
        assert_eq!(shard.read_count(), 2);
    }
}
