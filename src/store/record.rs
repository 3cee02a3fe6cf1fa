//! Record State Classification
//!
//! Answers whether a key's persisted copy is fresh, stale, or absent. The
//! state is derived on demand from persister metadata and never stored.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::persister::PersisterFacade;
use crate::cache::{CacheKey, CacheValue};

/// Freshness of a key's persisted copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Persisted and within its freshness window
    Fresh,
    /// Persisted but older than its freshness window
    Stale,
    /// Not persisted, or the persister keeps no freshness metadata
    Missing,
}

impl RecordState {
    /// Every state, for exhaustive iteration
    pub const ALL: [RecordState; 3] = [RecordState::Fresh, RecordState::Stale, RecordState::Missing];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Fresh => "fresh",
            RecordState::Stale => "stale",
            RecordState::Missing => "missing",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the persisted copy of `key`.
///
/// Delegates to the persister's record-state capability. A persister without
/// one can never vouch for freshness, so the answer is [`RecordState::Missing`].
pub fn classify<K: CacheKey, V: CacheValue>(key: &K, persister: &PersisterFacade<K, V>) -> RecordState {
    persister.record_state(key).unwrap_or(RecordState::Missing)
}
