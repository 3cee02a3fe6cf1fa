//! Stale Policy Resolution
//!
//! The single decision point for how a stale persisted record interacts with
//! the network. Every function here matches exhaustively on both enums, so a
//! new policy or state will not compile until each decision is extended.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::RecordState;
use crate::error::{Error, Result};

/// How staleness of the persisted copy interacts with network fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Serve whatever is cached or persisted
    #[default]
    Unspecified,
    /// A stale persisted record must be refreshed from the network first
    NetworkBeforeStale,
    /// Serve the stale record and refresh it in the background
    RefreshOnStale,
    /// Never fetch; a miss in every tier is an error
    CacheOnly,
}

impl StalePolicy {
    /// Every policy, for exhaustive iteration
    pub const ALL: [StalePolicy; 4] = [
        StalePolicy::Unspecified,
        StalePolicy::NetworkBeforeStale,
        StalePolicy::RefreshOnStale,
        StalePolicy::CacheOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StalePolicy::Unspecified => "unspecified",
            StalePolicy::NetworkBeforeStale => "network_before_stale",
            StalePolicy::RefreshOnStale => "refresh_on_stale",
            StalePolicy::CacheOnly => "cache_only",
        }
    }

    /// Whether a miss in every local tier may fall back to the network
    pub fn allows_fetch_on_miss(&self) -> bool {
        match self {
            StalePolicy::Unspecified | StalePolicy::NetworkBeforeStale | StalePolicy::RefreshOnStale => true,
            StalePolicy::CacheOnly => false,
        }
    }
}

impl fmt::Display for StalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalePolicy {
    type Err = Error;

    /// Accepts snake, kebab or upper case names. Anything else is a
    /// configuration error rather than a silent default.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        StalePolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == normalized)
            .ok_or_else(|| Error::Configuration(format!("unknown stale policy: {}", s)))
    }
}

/// True iff the network must be consulted before any cached value is
/// returned: the policy is `NetworkBeforeStale` and the record is stale.
pub fn requires_network_before_return(policy: StalePolicy, state: RecordState) -> bool {
    match (policy, state) {
        (StalePolicy::NetworkBeforeStale, RecordState::Stale) => true,
        (StalePolicy::NetworkBeforeStale, RecordState::Fresh | RecordState::Missing) => false,
        (
            StalePolicy::Unspecified | StalePolicy::RefreshOnStale | StalePolicy::CacheOnly,
            RecordState::Fresh | RecordState::Stale | RecordState::Missing,
        ) => false,
    }
}

/// True iff a stale record should be served now and refreshed out of band
pub fn should_refresh_in_background(policy: StalePolicy, state: RecordState) -> bool {
    match (policy, state) {
        (StalePolicy::RefreshOnStale, RecordState::Stale) => true,
        (StalePolicy::RefreshOnStale, RecordState::Fresh | RecordState::Missing) => false,
        (
            StalePolicy::Unspecified | StalePolicy::NetworkBeforeStale | StalePolicy::CacheOnly,
            RecordState::Fresh | RecordState::Stale | RecordState::Missing,
        ) => false,
    }
}
