//! Live map view over a [`LoadingCache`](super::LoadingCache).
//!
//! Reads and writes go straight to the cache. Iteration walks one shard at a
//! time, so it is weakly consistent: it never fails under concurrent
//! modification, but may or may not see changes made while it runs.

use std::sync::Arc;

use super::entry::CacheEntry;
use super::loading::{CacheKey, CacheValue, Inner};

/// Thread-safe map view of a cache's resident entries
pub struct CacheMap<'a, K, V> {
    inner: &'a Inner<K, V>,
}

impl<'a, K: CacheKey, V: CacheValue> CacheMap<'a, K, V> {
    pub(super) fn new(inner: &'a Inner<K, V>) -> Self {
        Self { inner }
    }

    /// Unexpired value for `key`. Does not touch hit/miss statistics.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lookup(key, self.inner.now())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains(key, self.inner.now())
    }

    /// Insert or overwrite, returning the previous value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Remove, returning the previous value
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// Resident entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weakly consistent iterator over unexpired entries
    pub fn iter(&self) -> Iter<'a, K, V> {
        Iter {
            inner: self.inner,
            next_shard: 0,
            buffer: Vec::new().into_iter(),
        }
    }

    /// Weakly consistent iterator over unexpired keys
    pub fn keys(&self) -> impl Iterator<Item = K> + 'a {
        self.iter().map(|(key, _)| key)
    }
}

impl<'a, K: CacheKey, V: CacheValue> IntoIterator for &CacheMap<'a, K, V> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`CacheMap::iter`]
pub struct Iter<'a, K, V> {
    inner: &'a Inner<K, V>,
    next_shard: usize,
    buffer: std::vec::IntoIter<(K, Arc<CacheEntry<V>>)>,
}

impl<K: CacheKey, V: CacheValue> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, entry)) = self.buffer.next() {
                if entry.is_expired(self.inner.now()) {
                    continue;
                }
                return Some((key, entry.value().clone()));
            }
            if self.next_shard >= self.inner.shard_count() {
                return None;
            }
            self.buffer = self.inner.shard_snapshot(self.next_shard).into_iter();
            self.next_shard += 1;
        }
    }
}
