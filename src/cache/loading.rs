//! Loading Cache - In-Memory Get-or-Load Cache
//!
//! Key→value cache whose misses are filled by caller-supplied async loaders.
//!
//! # Design
//!
//! - Entries live in a [`ShardedMap`], one RwLock per shard
//! - In-flight loads live in a `DashMap` keyed like the entries; taking the
//!   key's slot and checking for an existing flight is one atomic step
//! - Every caller of a flight awaits the same `Shared` future, so a loader
//!   runs at most once per key at a time and its outcome (value or error)
//!   reaches all of them
//! - The caller that registers a flight runs its loader only after the slot
//!   is released, handing the future over through a oneshot
//! - Interest in a flight is reference counted: when the last waiter is
//!   dropped before completion the flight is removed and the load dropped
//! - A finished load inserts its value before it clears its flight marker,
//!   so a caller always observes one or the other

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::config::{CacheConfig, Expiry};
use super::entry::CacheEntry;
use super::metrics::{CacheMetrics, CacheStats};
use super::shard::ShardedMap;
use super::view::CacheMap;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{BoxError, LoadError};

/// Requirements on cache keys
pub trait CacheKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Requirements on cached values
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

type LoadResult<V> = std::result::Result<V, LoadError>;
type LoadFuture<V> = Shared<BoxFuture<'static, LoadResult<V>>>;
type PendingLoad<V> = BoxFuture<'static, std::result::Result<Option<V>, BoxError>>;

/// Entries examined per eviction
const EVICTION_SAMPLE: usize = 32;

/// A load in progress for one key
struct Flight<V> {
    id: u64,
    future: LoadFuture<V>,
    waiters: usize,
}

/// Shared state behind every [`LoadingCache`] handle
pub(super) struct Inner<K, V> {
    entries: ShardedMap<K, Arc<CacheEntry<V>>>,
    in_flight: DashMap<K, Flight<V>>,
    expiry: Expiry,
    max_size: Option<u64>,
    clock: SharedClock,
    metrics: CacheMetrics,
    next_flight: AtomicU64,
    eviction: Mutex<()>,
    eviction_cursor: AtomicUsize,
}

impl<K: CacheKey, V: CacheValue> Inner<K, V> {
    #[inline]
    pub(super) fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Resident, unexpired value. Expired entries are swept on sight.
    pub(super) fn lookup(&self, key: &K, now: u64) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            self.expire(key, &entry);
            return None;
        }
        entry.record_access(now, &self.expiry);
        Some(entry.value().clone())
    }

    fn expire(&self, key: &K, entry: &Arc<CacheEntry<V>>) {
        // Only remove the exact entry we saw expire, not a newer write
        if self
            .entries
            .remove_if(key, |current| Arc::ptr_eq(current, entry))
            .is_some()
        {
            self.metrics.record_expirations(1);
        }
    }

    pub(super) fn contains(&self, key: &K, now: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert or overwrite, returning the previous live value
    pub(super) fn insert(&self, key: K, value: V) -> Option<V> {
        if self.max_size == Some(0) {
            self.metrics.record_evictions(1);
            return None;
        }
        let now = self.now();
        let entry = Arc::new(CacheEntry::new(value, now, &self.expiry));
        let previous = self
            .entries
            .insert(key, entry)
            .filter(|old| !old.is_expired(now))
            .map(|old| old.value().clone());
        self.enforce_max_size();
        previous
    }

    /// Remove, returning the previous live value
    pub(super) fn remove(&self, key: &K) -> Option<V> {
        let now = self.now();
        self.entries
            .remove(key)
            .filter(|old| !old.is_expired(now))
            .map(|old| old.value().clone())
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn shard_count(&self) -> usize {
        self.entries.shard_count()
    }

    pub(super) fn shard_snapshot(&self, index: usize) -> Vec<(K, Arc<CacheEntry<V>>)> {
        self.entries.shard(index).entries()
    }

    fn sweep_expired(&self) -> usize {
        let now = self.now();
        let removed = self.entries.retain(|_, entry| !entry.is_expired(now));
        self.metrics.record_expirations(removed as u64);
        removed
    }

    /// Evict until within `max_size`.
    ///
    /// Each victim is picked from a bounded sample of entries taken from the
    /// shards after a rotating cursor: an expired entry if the sample holds
    /// one, otherwise the least recently accessed.
    fn enforce_max_size(&self) {
        let Some(max) = self.max_size else {
            return;
        };
        if self.entries.len() as u64 <= max {
            return;
        }
        // Another thread is already evicting
        let Some(_guard) = self.eviction.try_lock() else {
            return;
        };

        let now = self.now();
        while self.entries.len() as u64 > max {
            let Some((key, victim)) = self.eviction_candidate(now) else {
                break;
            };
            if self
                .entries
                .remove_if(&key, |current| Arc::ptr_eq(current, &victim))
                .is_none()
            {
                continue;
            }
            if victim.is_expired(now) {
                self.metrics.record_expirations(1);
            } else {
                self.metrics.record_evictions(1);
                trace!(key = ?key, "evicted");
            }
        }
    }

    fn eviction_candidate(&self, now: u64) -> Option<(K, Arc<CacheEntry<V>>)> {
        let shard_count = self.entries.shard_count();
        let start = self.eviction_cursor.fetch_add(1, Ordering::Relaxed);
        let mut sample = Vec::with_capacity(EVICTION_SAMPLE);
        for offset in 0..shard_count {
            if sample.len() >= EVICTION_SAMPLE {
                break;
            }
            let shard = self.entries.shard(start.wrapping_add(offset) & (shard_count - 1));
            sample.extend(shard.sample(EVICTION_SAMPLE - sample.len()));
        }

        if let Some(index) = sample.iter().position(|(_, entry)| entry.is_expired(now)) {
            return Some(sample.swap_remove(index));
        }
        sample
            .into_iter()
            .min_by_key(|(_, entry)| entry.last_access())
    }

    /// Join the flight for `key`, or register a new one.
    ///
    /// A new flight is registered before its loader exists; the caller that
    /// started it runs the loader after the slot is released and hands the
    /// future over through the returned [`LoadFeed`].
    fn join_or_start(self: &Arc<Self>, key: K) -> Joined<K, V> {
        match self.in_flight.entry(key) {
            Entry::Occupied(mut slot) => {
                let flight = slot.get_mut();
                flight.waiters += 1;
                let (id, future) = (flight.id, flight.future.clone());
                trace!(key = ?slot.key(), "joining in-flight load");
                Joined::Waiting(Waiter {
                    inner: Arc::clone(self),
                    key: slot.key().clone(),
                    id,
                    future,
                    settled: false,
                })
            }
            Entry::Vacant(slot) => {
                // A load may have finished between the caller's lookup and
                // taking the slot
                if let Some(value) = self.lookup(slot.key(), self.now()) {
                    return Joined::Ready(value);
                }

                let key = slot.key().clone();
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let (feed, pending) = oneshot::channel::<PendingLoad<V>>();
                let inner = Arc::clone(self);
                let flight_key = key.clone();
                let future = async move {
                    let outcome = match pending.await {
                        Ok(load) => load.await,
                        Err(_) => Err("loader panicked before producing a load".into()),
                    };
                    inner.complete(flight_key, id, outcome)
                }
                .boxed()
                .shared();

                debug!(key = ?key, flight = id, "starting load");
                slot.insert(Flight {
                    id,
                    future: future.clone(),
                    waiters: 1,
                });
                Joined::Leading(
                    Waiter {
                        inner: Arc::clone(self),
                        key,
                        id,
                        future,
                        settled: false,
                    },
                    LoadFeed(feed),
                )
            }
        }
    }

    /// Publish a finished load. Runs exactly once per flight.
    fn complete<E>(&self, key: K, id: u64, outcome: std::result::Result<Option<V>, E>) -> LoadResult<V>
    where
        E: Into<BoxError>,
    {
        let result = match outcome {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(LoadError::Null),
            Err(err) => Err(LoadError::failed(err)),
        };

        match &result {
            Ok(value) => {
                self.metrics.record_load_success();
                self.insert(key.clone(), value.clone());
            }
            Err(err) => {
                self.metrics.record_load_failure();
                debug!(key = ?key, flight = id, error = %err, "load failed");
            }
        }

        self.in_flight.remove_if(&key, |_, flight| flight.id == id);
        result
    }
}

enum Joined<K: CacheKey, V: CacheValue> {
    Ready(V),
    Waiting(Waiter<K, V>),
    Leading(Waiter<K, V>, LoadFeed<V>),
}

/// Hands the loader's future to a freshly registered flight
struct LoadFeed<V>(oneshot::Sender<PendingLoad<V>>);

impl<V: CacheValue> LoadFeed<V> {
    fn start<Fut, E>(self, load: Fut)
    where
        Fut: Future<Output = std::result::Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let load: PendingLoad<V> =
            async move { load.await.map_err(Into::<BoxError>::into) }.boxed();
        // The leader's own waiter keeps the receiving flight alive
        let _ = self.0.send(load);
    }
}

/// One caller's interest in a flight
struct Waiter<K: CacheKey, V: CacheValue> {
    inner: Arc<Inner<K, V>>,
    key: K,
    id: u64,
    future: LoadFuture<V>,
    settled: bool,
}

impl<K: CacheKey, V: CacheValue> Waiter<K, V> {
    async fn wait(mut self) -> LoadResult<V> {
        let outcome = (&mut self.future).await;
        self.settled = true;
        outcome
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Waiter<K, V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let id = self.id;
        let abandoned = self.inner.in_flight.remove_if_mut(&self.key, |_, flight| {
            if flight.id != id {
                return false;
            }
            flight.waiters = flight.waiters.saturating_sub(1);
            flight.waiters == 0
        });
        if abandoned.is_some() {
            debug!(key = ?self.key, flight = id, "last waiter left, load abandoned");
        }
    }
}

// =============================================================================
// Loading Cache
// =============================================================================

/// In-memory loading cache with single-flight loads and clock-driven expiry
pub struct LoadingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for LoadingCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> LoadingCache<K, V> {
    /// Create an unbounded, non-expiring cache on the system clock
    pub fn new() -> Self {
        Self::build(CacheConfig::default(), SystemClock::shared())
    }

    /// Create a cache with custom configuration on the system clock
    pub fn with_config(config: CacheConfig) -> crate::Result<Self> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a cache with custom configuration and time source
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: ShardedMap::new(config.shard_count),
                in_flight: DashMap::new(),
                expiry: config.expiry(),
                max_size: config.max_size,
                clock,
                metrics: CacheMetrics::new(),
                next_flight: AtomicU64::new(0),
                eviction: Mutex::new(()),
                eviction_cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Cached value for `key`, never triggering a load
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let found = self.inner.lookup(key, self.inner.now());
        match found {
            Some(_) => self.inner.metrics.record_hit(),
            None => self.inner.metrics.record_miss(),
        }
        found
    }

    /// Cached value for `key`, loading it with `loader` on a miss.
    ///
    /// Concurrent callers for the same key share one loader invocation and
    /// all receive its outcome. Failures are not cached and leave any
    /// previous value untouched. `loader` runs after the key's flight is
    /// registered and its slot released.
    pub async fn get<F, Fut, E>(&self, key: K, loader: F) -> LoadResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.get_optional(key, move || {
            let load = loader();
            async move { load.await.map(Some) }
        })
        .await
    }

    /// Like [`get`](Self::get) for loaders that may produce nothing.
    ///
    /// A loader yielding `Ok(None)` fails every waiter with
    /// [`LoadError::Null`] and creates no entry.
    pub async fn get_optional<F, Fut, E>(&self, key: K, loader: F) -> LoadResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(&key, self.inner.now()) {
            self.inner.metrics.record_hit();
            return Ok(value);
        }
        self.inner.metrics.record_miss();

        match self.inner.join_or_start(key) {
            Joined::Ready(value) => Ok(value),
            Joined::Waiting(waiter) => waiter.wait().await,
            Joined::Leading(waiter, feed) => {
                feed.start(loader());
                waiter.wait().await
            }
        }
    }

    /// Resident, unexpired entries for `keys`; absent keys are omitted
    pub fn get_all_present<'a, I>(&self, keys: I) -> HashMap<K, V>
    where
        I: IntoIterator<Item = &'a K>,
    {
        let now = self.inner.now();
        let mut found = HashMap::new();
        for key in keys {
            match self.inner.lookup(key, now) {
                Some(value) => {
                    self.inner.metrics.record_hit();
                    found.insert(key.clone(), value);
                }
                None => self.inner.metrics.record_miss(),
            }
        }
        found
    }

    /// Insert or overwrite; resets the entry's expiry
    pub fn put(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Equivalent to `put` for each pair, in order
    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.inner.insert(key, value);
        }
    }

    /// Discard the entry for `key`. An in-flight load is not interrupted.
    pub fn invalidate(&self, key: &K) {
        if self.inner.entries.remove(key).is_some() {
            trace!(key = ?key, "invalidated");
        }
    }

    /// Discard the entries for `keys`
    pub fn invalidate_all_keys<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
    {
        for key in keys {
            self.invalidate(key);
        }
    }

    /// Discard every entry
    pub fn invalidate_all(&self) {
        self.inner.entries.clear();
        debug!("invalidated all entries");
    }

    /// Approximate number of resident entries, including expired entries
    /// not yet swept
    pub fn size(&self) -> u64 {
        self.inner.len() as u64
    }

    /// Live, thread-safe map view; writes go through to the cache
    pub fn as_map(&self) -> CacheMap<'_, K, V> {
        CacheMap::new(&self.inner)
    }

    /// Sweep expired entries, returning how many were removed
    pub fn clean_up(&self) -> usize {
        let removed = self.inner.sweep_expired();
        if removed > 0 {
            debug!(removed, "swept expired entries");
        }
        removed
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    /// Number of loads currently in progress
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// The cache's time source
    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("entries", &self.inner.entries.len())
            .field("in_flight", &self.inner.in_flight.len())
            .field("expiry", &self.inner.expiry)
            .field("max_size", &self.inner.max_size)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
