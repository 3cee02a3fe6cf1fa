//! In-Memory Loading Cache
//!
//! First tier of the store: a concurrent key→value cache that fills misses
//! through caller-supplied async loaders.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        LoadingCache                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Entries (ShardedMap)        │  In-flight loads (DashMap)    │
//! │  ┌────────────────────────┐  │  ┌─────────────────────────┐  │
//! │  │ key → CacheEntry       │  │  │ key → Shared<load>      │  │
//! │  │ value + clock stamps   │◄─┼──│ one loader per key,     │  │
//! │  └────────────────────────┘  │  │ outcome fanned out      │  │
//! │              │               │  └─────────────────────────┘  │
//! │              ▼                                               │
//! │     Expiry (write / access TTL) + max-size eviction          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one loader runs per key at a time
//! - Every concurrent caller of a load gets the same outcome
//! - Failed loads are never cached
//! - Expiry is judged against the injected [`Clock`](crate::clock::Clock)

mod config;
mod entry;
mod loading;
mod metrics;
mod shard;
mod view;

#[cfg(test)]
mod proptest;

pub use config::{CacheConfig, Expiry, DEFAULT_SHARD_COUNT};
pub use entry::CacheEntry;
pub use loading::{CacheKey, CacheValue, LoadingCache};
pub use metrics::{CacheMetrics, CacheStats};
pub use shard::{Shard, ShardedMap};
pub use view::{CacheMap, Iter};
