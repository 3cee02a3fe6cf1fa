//! Cache Entry Types
//!
//! An entry pairs a loaded value with the timestamps the expiry policy needs.
//! Timestamps come from the cache's [`Clock`](crate::clock::Clock), never
//! from wall time.

use std::sync::atomic::{AtomicU64, Ordering};

use super::config::Expiry;

/// Sentinel meaning "never expires"
const NO_EXPIRY: u64 = u64::MAX;

/// Cache entry containing a value and its timing metadata
pub struct CacheEntry<V> {
    /// The cached value
    value: V,
    /// Insertion timestamp (clock nanos)
    written_at: u64,
    /// Last access timestamp (clock nanos)
    last_access: AtomicU64,
    /// Absolute expiry (clock nanos), `NO_EXPIRY` if unbounded
    expires_at: AtomicU64,
}

impl<V> CacheEntry<V> {
    /// Create an entry written at `now` under the given expiry policy
    pub fn new(value: V, now: u64, expiry: &Expiry) -> Self {
        Self {
            value,
            written_at: now,
            last_access: AtomicU64::new(now),
            expires_at: AtomicU64::new(Self::deadline(now, expiry)),
        }
    }

    fn deadline(from: u64, expiry: &Expiry) -> u64 {
        match expiry.ttl_nanos() {
            Some(ttl) => from.saturating_add(ttl),
            None => NO_EXPIRY,
        }
    }

    /// Get the value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Get insertion time
    #[inline]
    pub fn written_at(&self) -> u64 {
        self.written_at
    }

    /// Get last access time
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Absolute expiry time, if any
    #[inline]
    pub fn expires_at(&self) -> Option<u64> {
        match self.expires_at.load(Ordering::Acquire) {
            NO_EXPIRY => None,
            at => Some(at),
        }
    }

    /// Check if entry has expired at `now`
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at.load(Ordering::Acquire)
    }

    /// Record an access; access-based policies push the deadline forward
    pub fn record_access(&self, now: u64, expiry: &Expiry) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        if let Expiry::AfterAccess(_) = expiry {
            self.expires_at
                .fetch_max(Self::deadline(now, expiry), Ordering::AcqRel);
        }
    }
}

impl<V> std::fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("written_at", &self.written_at)
            .field("last_access", &self.last_access())
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
