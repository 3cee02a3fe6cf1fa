//! Two-Tier Read-Through Store
//!
//! Memory cache in front of a persister in front of a network fetcher.
//!
//! # Read Path
//!
//! ```text
//! get(key)
//!   │
//!   ├─ classify persisted record ──► Fresh / Stale / Missing
//!   │
//!   ├─ NetworkBeforeStale + Stale ──► fresh(key)            (network first)
//!   ├─ RefreshOnStale + Stale ──────► spawn fresh(key)       (continue below)
//!   │
//!   └─ memory.get(key, loader)
//!         loader: persister.read(key)
//!                   └─ miss ──► CacheOnly? NotCached : fetch → persist → read back
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::broadcast::{InvalidationBroadcaster, Subscription};
use super::fetcher::{Fetcher, FnFetcher};
use super::persister::{NoopPersister, Persister, PersisterFacade};
use super::policy::{requires_network_before_return, should_refresh_in_background, StalePolicy};
use super::record::{classify, RecordState};
use crate::cache::{CacheConfig, CacheKey, CacheStats, CacheValue, LoadingCache};
use crate::clock::{SharedClock, SystemClock};
use crate::error::{Error, Result};

struct StoreInner<K, V> {
    memory: LoadingCache<K, V>,
    /// Zero-capacity cache used only to coalesce network fetches per key
    fetches: LoadingCache<K, V>,
    persister: PersisterFacade<K, V>,
    fetcher: Arc<dyn Fetcher<K, V>>,
    policy: StalePolicy,
    broadcaster: InvalidationBroadcaster<K>,
    /// Never sent on; its receivers observe the store being dropped
    alive: watch::Sender<()>,
}

impl<K: CacheKey, V: CacheValue> StoreInner<K, V> {
    async fn get(self: &Arc<Self>, key: K) -> Result<V> {
        let state = classify(&key, &self.persister);

        if requires_network_before_return(self.policy, state) {
            debug!(key = ?key, %state, "persisted record stale, fetching before return");
            return self.fresh(key).await;
        }
        if should_refresh_in_background(self.policy, state) {
            self.spawn_refresh(key.clone());
        }

        let inner = Arc::clone(self);
        let load_key = key.clone();
        self.memory
            .get(key, move || async move { inner.read_through(load_key).await })
            .await
            .map_err(Error::from_load)
    }

    /// Memory miss: persister first, then the network unless forbidden
    async fn read_through(self: Arc<Self>, key: K) -> Result<V> {
        if let Some(value) = self.persister.read(&key).await? {
            return Ok(value);
        }
        if !self.policy.allows_fetch_on_miss() {
            return Err(Error::NotCached {
                key: format!("{:?}", key),
            });
        }
        self.fetch_and_persist(key).await
    }

    async fn fresh(self: &Arc<Self>, key: K) -> Result<V> {
        let value = self.fetch_and_persist(key.clone()).await?;
        self.memory.put(key, value.clone());
        Ok(value)
    }

    /// Fetch, persist, and read back. Concurrent calls per key share one fetch.
    async fn fetch_and_persist(self: &Arc<Self>, key: K) -> Result<V> {
        let inner = Arc::clone(self);
        let fetch_key = key.clone();
        self.fetches
            .get(key, move || async move {
                let value = inner.fetcher.fetch(&fetch_key).await?;
                inner.persister.write(&fetch_key, value.clone()).await?;
                let persisted = inner.persister.read(&fetch_key).await?;
                Ok::<_, Error>(persisted.unwrap_or(value))
            })
            .await
            .map_err(Error::from_load)
    }

    fn spawn_refresh(self: &Arc<Self>, key: K) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = ?key, "no runtime for background refresh, skipping");
            return;
        };
        let inner = Arc::clone(self);
        debug!(key = ?key, "refreshing stale record in background");
        runtime.spawn(async move {
            if let Err(err) = inner.fresh(key.clone()).await {
                warn!(key = ?key, error = %err, "background refresh failed");
            }
        });
    }
}

// =============================================================================
// Store
// =============================================================================

/// Read-through store over memory, persister and network tiers
pub struct Store<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Store<K, V> {
    /// Start building a store around `fetcher`
    pub fn builder(fetcher: impl Fetcher<K, V> + 'static) -> StoreBuilder<K, V> {
        StoreBuilder::new(fetcher)
    }

    /// Value for `key`, honoring the configured stale policy
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: K) -> Result<V> {
        self.inner.get(key).await
    }

    /// Fetch from the network, persist, and update memory
    #[instrument(level = "debug", skip(self))]
    pub async fn fresh(&self, key: K) -> Result<V> {
        self.inner.fresh(key).await
    }

    /// Emits `get(key)`, then re-emits every time `key` is invalidated.
    ///
    /// The stream ends once the store and all its clones are dropped, even
    /// while handles to its broadcaster remain.
    pub fn stream(&self, key: K) -> impl Stream<Item = Result<V>> + Send + 'static {
        let state = StreamState {
            store: Arc::downgrade(&self.inner),
            subscription: self.inner.broadcaster.subscribe(key.clone()),
            store_alive: self.inner.alive.subscribe(),
            key,
            started: false,
        };
        stream::unfold(state, |mut state| async move {
            if state.started {
                tokio::select! {
                    event = state.subscription.recv() => event?,
                    _ = state.store_alive.changed() => return None,
                };
            }
            state.started = true;
            let Some(inner) = state.store.upgrade() else {
                return None;
            };
            let item = inner.get(state.key.clone()).await;
            drop(inner);
            Some((item, state))
        })
    }

    /// Drop `key` from memory and the persister, then notify its streams
    #[instrument(level = "debug", skip(self))]
    pub async fn clear(&self, key: &K) -> Result<()> {
        self.inner.memory.invalidate(key);
        let cleared = self.inner.persister.clear(key).await;
        // Memory is already gone, so streams must re-read either way
        let notified = self.inner.broadcaster.invalidate(key);
        match &cleared {
            Ok(()) => debug!(notified, "cleared"),
            Err(err) => warn!(notified, error = %err, "persister clear failed"),
        }
        cleared
    }

    /// Notify the streams of `key` without touching any tier
    pub fn invalidate(&self, key: &K) -> usize {
        self.inner.broadcaster.invalidate(key)
    }

    /// Drop every memory entry; persisted records are kept
    pub fn clear_memory(&self) {
        self.inner.memory.invalidate_all();
    }

    /// Classified state of the persisted record for `key`
    pub fn record_state(&self, key: &K) -> RecordState {
        classify(key, &self.inner.persister)
    }

    pub fn stale_policy(&self) -> StalePolicy {
        self.inner.policy
    }

    /// Memory tier
    pub fn memory(&self) -> &LoadingCache<K, V> {
        &self.inner.memory
    }

    pub fn broadcaster(&self) -> &InvalidationBroadcaster<K> {
        &self.inner.broadcaster
    }

    /// Memory tier statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.memory.stats()
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("memory", &self.inner.memory)
            .field("persister", &self.inner.persister)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

struct StreamState<K: CacheKey, V> {
    store: Weak<StoreInner<K, V>>,
    subscription: Subscription<K>,
    store_alive: watch::Receiver<()>,
    key: K,
    started: bool,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Store`]
pub struct StoreBuilder<K, V> {
    fetcher: Arc<dyn Fetcher<K, V>>,
    persister: Option<Arc<dyn Persister<K, V>>>,
    policy: StalePolicy,
    cache_config: CacheConfig,
    clock: Option<SharedClock>,
}

impl<K: CacheKey, V: CacheValue> StoreBuilder<K, V> {
    pub fn new(fetcher: impl Fetcher<K, V> + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            persister: None,
            policy: StalePolicy::default(),
            cache_config: CacheConfig::default(),
            clock: None,
        }
    }

    /// Build around an async closure instead of a [`Fetcher`] impl
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<V>> + Send + 'static,
    {
        Self::new(FnFetcher::new(f))
    }

    /// Second tier. Without one, nothing is persisted.
    pub fn persister(mut self, persister: Arc<dyn Persister<K, V>>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Memory tier configuration
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Time source for memory-tier expiry
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Store<K, V>> {
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let memory = LoadingCache::with_clock(self.cache_config.clone(), Arc::clone(&clock))?;
        let fetches = LoadingCache::with_clock(
            CacheConfig::new()
                .with_max_size(0)
                .with_shard_count(self.cache_config.shard_count),
            clock,
        )?;
        let persister: Arc<dyn Persister<K, V>> = match self.persister {
            Some(persister) => persister,
            None => Arc::new(NoopPersister::new()),
        };

        debug!(policy = %self.policy, "store built");
        Ok(Store {
            inner: Arc::new(StoreInner {
                memory,
                fetches,
                persister: PersisterFacade::new(persister),
                fetcher: self.fetcher,
                policy: self.policy,
                broadcaster: InvalidationBroadcaster::new(),
                alive: watch::channel(()).0,
            }),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
