//! Persister - Second Tier Storage
//!
//! Durable key→value storage behind the memory cache. Beyond plain read and
//! write, a persister may offer two optional capabilities:
//!
//! - [`RecordProvider`]: reports whether a persisted record is fresh or stale
//! - [`Clearable`]: deletes a persisted record by key
//!
//! [`PersisterFacade`] resolves both once at construction. A missing
//! capability degrades to a conservative default (`None` state, no-op clear)
//! and never fails.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::record::RecordState;
use crate::cache::{CacheKey, CacheValue};
use crate::clock::{duration_to_nanos, SharedClock};
use crate::error::Result;

/// Durable storage for values by key
#[async_trait]
pub trait Persister<K, V>: Send + Sync {
    /// Read the persisted value, if any
    async fn read(&self, key: &K) -> Result<Option<V>>;

    /// Persist a value, replacing any previous one
    async fn write(&self, key: &K, value: V) -> Result<()>;

    /// Record-state capability, if supported
    fn record_states(&self) -> Option<&dyn RecordProvider<K>> {
        None
    }

    /// Clear-by-key capability, if supported
    fn clearable(&self) -> Option<&dyn Clearable<K>> {
        None
    }
}

/// Reports the freshness of persisted records. Must not have side effects.
pub trait RecordProvider<K>: Send + Sync {
    fn record_state(&self, key: &K) -> RecordState;
}

/// Deletes persisted records by key
#[async_trait]
pub trait Clearable<K>: Send + Sync {
    async fn clear(&self, key: &K) -> Result<()>;
}

/// Capabilities a persister advertised at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub record_states: bool,
    pub clearable: bool,
}

// =============================================================================
// Persister Facade
// =============================================================================

/// Capability-aware wrapper around a [`Persister`]
pub struct PersisterFacade<K, V> {
    persister: Arc<dyn Persister<K, V>>,
    capabilities: Capabilities,
}

impl<K, V> Clone for PersisterFacade<K, V> {
    fn clone(&self) -> Self {
        Self {
            persister: Arc::clone(&self.persister),
            capabilities: self.capabilities,
        }
    }
}

impl<K: CacheKey, V: CacheValue> PersisterFacade<K, V> {
    pub fn new(persister: Arc<dyn Persister<K, V>>) -> Self {
        let capabilities = Capabilities {
            record_states: persister.record_states().is_some(),
            clearable: persister.clearable().is_some(),
        };
        debug!(
            record_states = capabilities.record_states,
            clearable = capabilities.clearable,
            "persister capabilities resolved"
        );
        Self {
            persister,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub async fn read(&self, key: &K) -> Result<Option<V>> {
        self.persister.read(key).await
    }

    pub async fn write(&self, key: &K, value: V) -> Result<()> {
        self.persister.write(key, value).await
    }

    /// Reported state, or `None` without the record-state capability
    pub fn record_state(&self, key: &K) -> Option<RecordState> {
        if !self.capabilities.record_states {
            return None;
        }
        self.persister
            .record_states()
            .map(|provider| provider.record_state(key))
    }

    /// Clear the persisted record. A no-op without the clear capability.
    pub async fn clear(&self, key: &K) -> Result<()> {
        if !self.capabilities.clearable {
            trace!(key = ?key, "persister not clearable, skipping");
            return Ok(());
        }
        match self.persister.clearable() {
            Some(clearable) => clearable.clear(key).await,
            None => Ok(()),
        }
    }
}

impl<K, V> fmt::Debug for PersisterFacade<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersisterFacade")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// =============================================================================
// Noop Persister
// =============================================================================

/// Persister that stores nothing. Used when a store has no second tier.
pub struct NoopPersister<K, V> {
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> NoopPersister<K, V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for NoopPersister<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Persister<K, V> for NoopPersister<K, V> {
    async fn read(&self, _key: &K) -> Result<Option<V>> {
        Ok(None)
    }

    async fn write(&self, _key: &K, _value: V) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// In-Memory Persister
// =============================================================================

struct Record<V> {
    value: V,
    written_at: u64,
}

/// Persister statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersisterStats {
    pub records: u64,
    pub reads: u64,
    pub writes: u64,
    pub clears: u64,
}

/// DashMap-backed persister with a clock-driven freshness window.
///
/// A record written at `t` is fresh while `now < t + freshness` and stale
/// afterwards. Supports both optional capabilities.
pub struct InMemoryPersister<K, V> {
    records: DashMap<K, Record<V>>,
    freshness: u64,
    clock: SharedClock,
    reads: AtomicU64,
    writes: AtomicU64,
    clears: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> InMemoryPersister<K, V> {
    /// Create an empty persister whose records go stale after `freshness`
    pub fn new(freshness: Duration, clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            freshness: duration_to_nanos(freshness),
            clock,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.records.contains_key(key)
    }

    pub fn stats(&self) -> PersisterStats {
        PersisterStats {
            records: self.records.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Persister<K, V> for InMemoryPersister<K, V> {
    async fn read(&self, key: &K) -> Result<Option<V>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(key).map(|record| record.value.clone()))
    }

    async fn write(&self, key: &K, value: V) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let record = Record {
            value,
            written_at: self.clock.now_nanos(),
        };
        self.records.insert(key.clone(), record);
        Ok(())
    }

    fn record_states(&self) -> Option<&dyn RecordProvider<K>> {
        Some(self)
    }

    fn clearable(&self) -> Option<&dyn Clearable<K>> {
        Some(self)
    }
}

impl<K: CacheKey, V: CacheValue> RecordProvider<K> for InMemoryPersister<K, V> {
    fn record_state(&self, key: &K) -> RecordState {
        let Some(written_at) = self.records.get(key).map(|record| record.written_at) else {
            return RecordState::Missing;
        };
        if self.clock.now_nanos() >= written_at.saturating_add(self.freshness) {
            RecordState::Stale
        } else {
            RecordState::Fresh
        }
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Clearable<K> for InMemoryPersister<K, V> {
    async fn clear(&self, key: &K) -> Result<()> {
        self.clears.fetch_add(1, Ordering::Relaxed);
        if self.records.remove(key).is_some() {
            trace!(key = ?key, "persisted record cleared");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
