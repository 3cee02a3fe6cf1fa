//! Invalidation Broadcaster
//!
//! Per-key multicast signal. Consumers subscribe to a key and are woken once
//! for every `invalidate` of that key; consumers of other keys never hear
//! about it. Events carry the key and nothing else.
//!
//! # Design
//!
//! - Registry is a `DashMap` of key → subscriber id → unbounded sender, so
//!   registering, signaling, and deregistering are safe from any thread
//! - A [`Subscription`] deregisters itself on drop
//! - Subscriptions hold the registry weakly: once every broadcaster handle
//!   is gone, pending and future `recv` calls return `None`

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::cache::CacheKey;

/// Signal that a key's data must be re-read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent<K> {
    pub key: K,
}

struct Registry<K> {
    listeners: DashMap<K, HashMap<u64, mpsc::UnboundedSender<InvalidationEvent<K>>>>,
    next_id: AtomicU64,
}

/// Multicast invalidation signal keyed by cache key
pub struct InvalidationBroadcaster<K> {
    registry: Arc<Registry<K>>,
}

impl<K> Clone for InvalidationBroadcaster<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K: CacheKey> Default for InvalidationBroadcaster<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey> InvalidationBroadcaster<K> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register interest in invalidations of `key`
    pub fn subscribe(&self, key: K) -> Subscription<K> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .listeners
            .entry(key.clone())
            .or_default()
            .insert(id, tx);
        trace!(key = ?key, subscriber = id, "subscribed");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            key,
            id,
            rx,
        }
    }

    /// Signal every live subscriber of `key`, returning how many were reached
    pub fn invalidate(&self, key: &K) -> usize {
        let Some(subscribers) = self.registry.listeners.get(key) else {
            return 0;
        };
        let event = InvalidationEvent { key: key.clone() };
        let reached = subscribers
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count();
        trace!(key = ?key, reached, "invalidation broadcast");
        reached
    }

    /// Number of live subscriptions for `key`
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.registry
            .listeners
            .get(key)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// Number of keys with at least one subscription
    pub fn key_count(&self) -> usize {
        self.registry.listeners.len()
    }
}

impl<K: CacheKey> fmt::Debug for InvalidationBroadcaster<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBroadcaster")
            .field("keys", &self.registry.listeners.len())
            .finish()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A registered listener for one key. Dropping it deregisters.
pub struct Subscription<K: CacheKey> {
    registry: Weak<Registry<K>>,
    key: K,
    id: u64,
    rx: mpsc::UnboundedReceiver<InvalidationEvent<K>>,
}

impl<K: CacheKey> Subscription<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Wait for the next invalidation. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<InvalidationEvent<K>> {
        self.rx.recv().await
    }

    /// Next already-delivered invalidation, without waiting
    pub fn try_recv(&mut self) -> Option<InvalidationEvent<K>> {
        self.rx.try_recv().ok()
    }
}

impl<K: CacheKey> Drop for Subscription<K> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let id = self.id;
        registry.listeners.remove_if_mut(&self.key, |_, subscribers| {
            subscribers.remove(&id);
            subscribers.is_empty()
        });
        trace!(key = ?self.key, subscriber = id, "unsubscribed");
    }
}

impl<K: CacheKey> fmt::Debug for Subscription<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
