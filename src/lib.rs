//! stalecache - Two-Tier Read-Through Cache
//!
//! An in-memory loading cache with single-flight loads and TTL expiry, in
//! front of an optional persister, in front of a network fetcher. A stale
//! policy decides when a stale persisted record may be served and when the
//! network must be consulted first.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Store ──► StalePolicy × RecordState ──► LoadingCache (memory)
//!              │                                        │ miss
//!              │                                        ▼
//!              │                                    Persister ──► Fetcher
//!              │
//!              └── clear(key) ──► memory + persister ──► InvalidationBroadcaster
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Loading cache, expiry, statistics
//! - [`clock`] - Time sources used for every TTL decision
//! - [`error`] - Error types
//! - [`store`] - Record classification, stale policy, persister, broadcaster

pub mod cache;
pub mod clock;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, LoadingCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{BoxError, Error, LoadError, Result};
pub use store::{
    InMemoryPersister, InvalidationBroadcaster, Persister, RecordState, StalePolicy, Store,
    StoreBuilder,
};
