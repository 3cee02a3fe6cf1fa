//! Property-Based Tests for the Loading Cache
//!
//! # Test Properties
//!
//! 1. **Model Agreement**: put/invalidate sequences agree with a `HashMap`
//! 2. **Write Expiry**: an entry is visible exactly while `elapsed < ttl`
//! 3. **Bounded Size**: resident entries never exceed `max_size`

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::{CacheConfig, LoadingCache};
use crate::clock::ManualClock;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u32),
    Invalidate(u8),
    InvalidateAll,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..16, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0u8..16).prop_map(Op::Invalidate),
        1 => Just(Op::InvalidateAll),
    ]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_matches_hashmap_model(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let cache: LoadingCache<u8, u32> =
            LoadingCache::with_config(CacheConfig::new().with_shard_count(4)).unwrap();
        let mut model: HashMap<u8, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    cache.put(k, v);
                    model.insert(k, v);
                }
                Op::Invalidate(k) => {
                    cache.invalidate(&k);
                    model.remove(&k);
                }
                Op::InvalidateAll => {
                    cache.invalidate_all();
                    model.clear();
                }
            }
        }

        prop_assert_eq!(cache.size(), model.len() as u64);
        for k in 0u8..16 {
            prop_assert_eq!(cache.get_if_present(&k), model.get(&k).copied());
        }
        let viewed: HashMap<u8, u32> = cache.as_map().iter().collect();
        prop_assert_eq!(viewed, model);
    }

    #[test]
    fn prop_write_expiry_boundary(ttl_ms in 1u64..10_000, elapsed_ms in 0u64..20_000) {
        let clock = Arc::new(ManualClock::new());
        let cache: LoadingCache<u8, u8> = LoadingCache::with_clock(
            CacheConfig::new().with_expire_after_write(Duration::from_millis(ttl_ms)),
            clock.clone(),
        )
        .unwrap();

        cache.put(1, 1);
        clock.advance(Duration::from_millis(elapsed_ms));

        let visible = cache.get_if_present(&1).is_some();
        prop_assert_eq!(visible, elapsed_ms < ttl_ms);
    }

    #[test]
    fn prop_size_never_exceeds_max(
        max_size in 0u64..20,
        keys in prop::collection::vec(any::<u16>(), 0..100),
    ) {
        let clock = Arc::new(ManualClock::new());
        let cache: LoadingCache<u16, u16> = LoadingCache::with_clock(
            CacheConfig::new().with_max_size(max_size),
            clock.clone(),
        )
        .unwrap();

        for key in keys {
            clock.advance(Duration::from_nanos(1));
            cache.put(key, key);
            prop_assert!(cache.size() <= max_size);
        }
    }
}
