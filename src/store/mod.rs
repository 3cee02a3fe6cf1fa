//! Read-Through Store
//!
//! Second tier and policy layer on top of the memory [`LoadingCache`]:
//!
//! - [`record`] - classifies a persisted record as fresh, stale or missing
//! - [`policy`] - decides when staleness forces a network fetch
//! - [`persister`] - persister port with optional capabilities
//! - [`broadcast`] - per-key invalidation signals
//! - [`fetcher`] - network port
//!
//! [`Store`] ties them together.
//!
//! [`LoadingCache`]: crate::cache::LoadingCache

pub mod broadcast;
pub mod fetcher;
pub mod persister;
pub mod policy;
pub mod record;
#[allow(clippy::module_inception)]
mod store;

pub use broadcast::{InvalidationBroadcaster, InvalidationEvent, Subscription};
pub use fetcher::{Fetcher, FnFetcher};
pub use persister::{
    Capabilities, Clearable, InMemoryPersister, NoopPersister, Persister, PersisterFacade,
    PersisterStats, RecordProvider,
};
pub use policy::{requires_network_before_return, should_refresh_in_background, StalePolicy};
pub use record::{classify, RecordState};
pub use store::{Store, StoreBuilder};
