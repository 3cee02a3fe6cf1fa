//! Memory Policy Configuration

use std::time::Duration;

use crate::clock::duration_to_nanos;
use crate::error::{Error, Result};

/// Default shard count for the entry map
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// How long an entry stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Entries live until invalidated or evicted
    #[default]
    Never,
    /// Entries expire a fixed time after they were written
    AfterWrite(Duration),
    /// Entries expire a fixed time after they were last read or written
    AfterAccess(Duration),
}

impl Expiry {
    /// TTL in nanoseconds, if bounded
    pub fn ttl_nanos(&self) -> Option<u64> {
        match self {
            Expiry::Never => None,
            Expiry::AfterWrite(ttl) | Expiry::AfterAccess(ttl) => Some(duration_to_nanos(*ttl)),
        }
    }
}

/// Loading cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expire entries this long after they are written
    pub expire_after_write: Option<Duration>,
    /// Expire entries this long after their last access
    pub expire_after_access: Option<Duration>,
    /// Maximum number of resident entries (`Some(0)` caches nothing)
    pub max_size: Option<u64>,
    /// Number of entry-map shards (power of two)
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_after_write: None,
            expire_after_access: None,
            max_size: None,
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire entries a fixed time after write.
    pub fn with_expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Expire entries a fixed time after last access.
    pub fn with_expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// Bound the number of resident entries.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Set the shard count.
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Reject conflicting or malformed settings.
    pub fn validate(&self) -> Result<()> {
        if self.expire_after_write.is_some() && self.expire_after_access.is_some() {
            return Err(Error::Configuration(
                "expire_after_write and expire_after_access are mutually exclusive".into(),
            ));
        }
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "shard_count must be a non-zero power of two, got {}",
                self.shard_count
            )));
        }
        Ok(())
    }

    /// Resolved expiry policy
    pub fn expiry(&self) -> Expiry {
        match (self.expire_after_write, self.expire_after_access) {
            (Some(ttl), _) => Expiry::AfterWrite(ttl),
            (None, Some(ttl)) => Expiry::AfterAccess(ttl),
            (None, None) => Expiry::Never,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiry(), Expiry::Never);
        assert_eq!(config.shard_count, DEFAULT_SHARD_COUNT);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_expire_after_write(Duration::from_secs(30))
            .with_max_size(500)
            .with_shard_count(8);

        assert!(config.validate().is_ok());
        assert_eq!(config.expiry(), Expiry::AfterWrite(Duration::from_secs(30)));
        assert_eq!(config.max_size, Some(500));
        assert_eq!(config.shard_count, 8);
    }

    #[test]
    fn test_write_and_access_expiry_conflict() {
        let config = CacheConfig::new()
            .with_expire_after_write(Duration::from_secs(1))
            .with_expire_after_access(Duration::from_secs(1));

        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_shard_count_must_be_power_of_two() {
        assert_matches!(
            CacheConfig::new().with_shard_count(12).validate(),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            CacheConfig::new().with_shard_count(0).validate(),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_ttl_nanos() {
        assert_eq!(Expiry::Never.ttl_nanos(), None);
        assert_eq!(
            Expiry::AfterAccess(Duration::from_micros(3)).ttl_nanos(),
            Some(3_000)
        );
    }
}
