//! Store Integration Tests
//!
//! End-to-end read paths through memory, persister and network:
//! - Stale policy scenarios
//! - Persister capability degradation
//! - Invalidation streams

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;

use stalecache::store::{
    classify, requires_network_before_return, Clearable, Persister, PersisterFacade,
    RecordProvider,
};
use stalecache::{
    Error, InMemoryPersister, ManualClock, RecordState, Result, StalePolicy, Store, StoreBuilder,
};

/// Store over an in-memory persister and a counting fake network
struct Fixture {
    store: Store<String, String>,
    persister: Arc<InMemoryPersister<String, String>>,
    clock: Arc<ManualClock>,
    network_calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new(policy: StalePolicy) -> Self {
        let clock = Arc::new(ManualClock::new());
        let persister = Arc::new(InMemoryPersister::<String, String>::new(
            Duration::from_secs(300),
            clock.clone(),
        ));
        let network_calls = Arc::new(AtomicUsize::new(0));
        let calls = network_calls.clone();
        let store = StoreBuilder::from_fn(move |key: String| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, Error>(format!("{}:network:{}", key, n))
            }
        })
        .persister(persister.clone())
        .stale_policy(policy)
        .clock(clock.clone())
        .build()
        .unwrap();

        Self {
            store,
            persister,
            clock,
            network_calls,
        }
    }

    async fn seed_persisted(&self, key: &str, value: &str) {
        self.persister
            .write(&key.to_string(), value.to_string())
            .await
            .unwrap();
    }

    fn calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Stale Policy Scenarios
// =============================================================================

mod policy_tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_only_stale_record_serves_memory() {
        let f = Fixture::new(StalePolicy::CacheOnly);
        f.seed_persisted("user", "persisted").await;
        f.store.memory().put("user".into(), "in-memory".into());
        f.clock.advance(Duration::from_secs(600));

        assert_eq!(f.store.record_state(&"user".into()), RecordState::Stale);
        assert_eq!(f.store.get("user".into()).await.unwrap(), "in-memory");
        assert_eq!(f.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_before_stale_signals_fetch_despite_memory() {
        let f = Fixture::new(StalePolicy::NetworkBeforeStale);
        f.seed_persisted("user", "persisted").await;
        f.store.memory().put("user".into(), "in-memory".into());
        f.clock.advance(Duration::from_secs(600));

        let state = f.store.record_state(&"user".into());
        assert!(requires_network_before_return(f.store.stale_policy(), state));

        assert_eq!(f.store.get("user".into()).await.unwrap(), "user:network:0");
        assert_eq!(f.calls(), 1);
    }

    #[tokio::test]
    async fn test_unspecified_serves_stale_record_without_network() {
        let f = Fixture::new(StalePolicy::Unspecified);
        f.seed_persisted("user", "persisted").await;
        f.clock.advance(Duration::from_secs(600));

        assert_eq!(f.store.get("user".into()).await.unwrap(), "persisted");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_on_stale_serves_then_refreshes() {
        let f = Fixture::new(StalePolicy::RefreshOnStale);
        f.seed_persisted("user", "persisted").await;
        f.clock.advance(Duration::from_secs(600));

        assert_eq!(f.store.get("user".into()).await.unwrap(), "persisted");

        let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if f.store.memory().get_if_present(&"user".into()).as_deref()
                    == Some("user:network:0")
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(refreshed.is_ok(), "background refresh never landed");
        assert_eq!(f.store.record_state(&"user".into()), RecordState::Fresh);
    }

    #[tokio::test]
    async fn test_cache_only_total_miss_errors() {
        let f = Fixture::new(StalePolicy::CacheOnly);
        assert_matches!(
            f.store.get("ghost".into()).await,
            Err(Error::NotCached { .. })
        );
        assert_eq!(f.calls(), 0);
        assert!(f.store.memory().get_if_present(&"ghost".into()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_fetch_once() {
        let f = Fixture::new(StalePolicy::Unspecified);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = f.store.clone();
                tokio::spawn(async move { store.get("shared".into()).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared:network:0");
        }
        assert_eq!(f.calls(), 1);
        assert_eq!(f.persister.stats().writes, 1);
    }
}

// =============================================================================
// Persister Capabilities
// =============================================================================

/// Persister with plain read/write and no optional capabilities
#[derive(Default)]
struct BarePersister {
    records: DashMap<String, String>,
}

#[async_trait]
impl Persister<String, String> for BarePersister {
    async fn read(&self, key: &String) -> Result<Option<String>> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }

    async fn write(&self, key: &String, value: String) -> Result<()> {
        self.records.insert(key.clone(), value);
        Ok(())
    }
}

/// Persister that reports every record stale but cannot clear
#[derive(Default)]
struct AlwaysStalePersister {
    records: DashMap<String, String>,
}

#[async_trait]
impl Persister<String, String> for AlwaysStalePersister {
    async fn read(&self, key: &String) -> Result<Option<String>> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }

    async fn write(&self, key: &String, value: String) -> Result<()> {
        self.records.insert(key.clone(), value);
        Ok(())
    }

    fn record_states(&self) -> Option<&dyn RecordProvider<String>> {
        Some(self)
    }
}

impl RecordProvider<String> for AlwaysStalePersister {
    fn record_state(&self, key: &String) -> RecordState {
        if self.records.contains_key(key) {
            RecordState::Stale
        } else {
            RecordState::Missing
        }
    }
}

/// Persister whose clear always fails
#[derive(Default)]
struct FailingClearPersister;

#[async_trait]
impl Persister<String, String> for FailingClearPersister {
    async fn read(&self, _key: &String) -> Result<Option<String>> {
        Ok(None)
    }

    async fn write(&self, _key: &String, _value: String) -> Result<()> {
        Ok(())
    }

    fn clearable(&self) -> Option<&dyn Clearable<String>> {
        Some(self)
    }
}

#[async_trait]
impl Clearable<String> for FailingClearPersister {
    async fn clear(&self, key: &String) -> Result<()> {
        Err(Error::Persister(format!("read-only volume, cannot clear {}", key)))
    }
}

mod capability_tests {
    use super::*;

    fn store_with(
        persister: Arc<dyn Persister<String, String>>,
        policy: StalePolicy,
    ) -> Store<String, String> {
        StoreBuilder::from_fn(|key: String| async move { Ok::<_, Error>(format!("net-{}", key)) })
            .persister(persister)
            .stale_policy(policy)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bare_persister_classifies_missing_and_clear_is_noop() {
        let bare = Arc::new(BarePersister::default());
        bare.write(&"k".into(), "disk".into()).await.unwrap();

        let facade = PersisterFacade::<String, String>::new(bare.clone());
        assert_eq!(classify(&"k".to_string(), &facade), RecordState::Missing);

        let store = store_with(bare.clone(), StalePolicy::NetworkBeforeStale);
        // Missing never forces the network, so the persisted value is served
        assert_eq!(store.get("k".into()).await.unwrap(), "disk");

        store.clear(&"k".into()).await.unwrap();
        assert!(store.memory().get_if_present(&"k".into()).is_none());
        assert!(bare.records.contains_key("k"));
    }

    #[tokio::test]
    async fn test_record_state_capability_without_clear() {
        let persister = Arc::new(AlwaysStalePersister::default());
        persister.write(&"k".into(), "disk".into()).await.unwrap();

        let store = store_with(persister.clone(), StalePolicy::NetworkBeforeStale);
        assert_eq!(store.record_state(&"k".into()), RecordState::Stale);
        assert_eq!(store.get("k".into()).await.unwrap(), "net-k");

        store.clear(&"k".into()).await.unwrap();
        assert!(persister.records.contains_key("k"));
    }

    #[tokio::test]
    async fn test_clear_failure_propagates_after_notifying_streams() {
        let store = store_with(Arc::new(FailingClearPersister), StalePolicy::Unspecified);
        let mut stream = Box::pin(store.stream("k".into()));
        assert_eq!(stream.next().await.unwrap().unwrap(), "net-k");
        assert!(store.memory().get_if_present(&"k".into()).is_some());

        assert_matches!(
            store.clear(&"k".into()).await,
            Err(Error::Persister(msg)) if msg.contains("read-only")
        );
        assert!(store.memory().get_if_present(&"k".into()).is_none());

        // The stream still restarts even though the persisted copy survived
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert_eq!(next.unwrap().unwrap().unwrap(), "net-k");
    }
}

// =============================================================================
// Invalidation Streams
// =============================================================================

mod stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_restarts_on_clear() {
        let f = Fixture::new(StalePolicy::Unspecified);
        let mut stream = Box::pin(f.store.stream("feed".into()));

        assert_eq!(stream.next().await.unwrap().unwrap(), "feed:network:0");

        f.store.clear(&"feed".into()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "feed:network:1");
        assert_eq!(f.calls(), 2);
    }

    #[tokio::test]
    async fn test_signal_only_invalidation_rereads_memory() {
        let f = Fixture::new(StalePolicy::Unspecified);
        let mut stream = Box::pin(f.store.stream("feed".into()));
        assert_eq!(stream.next().await.unwrap().unwrap(), "feed:network:0");

        f.store.memory().put("feed".into(), "pushed".into());
        assert_eq!(f.store.invalidate(&"feed".into()), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), "pushed");
        assert_eq!(f.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_key_streams_unaffected() {
        let f = Fixture::new(StalePolicy::Unspecified);
        let mut a = Box::pin(f.store.stream("a".into()));
        let mut b = Box::pin(f.store.stream("b".into()));
        a.next().await.unwrap().unwrap();
        b.next().await.unwrap().unwrap();

        f.store.clear(&"a".into()).await.unwrap();
        assert!(a.next().await.is_some());

        let idle = tokio::time::timeout(Duration::from_millis(50), b.next()).await;
        assert!(idle.is_err(), "stream for b should not re-emit");
    }

    #[tokio::test]
    async fn test_dropping_stream_deregisters() {
        let f = Fixture::new(StalePolicy::Unspecified);
        {
            let mut stream = Box::pin(f.store.stream("k".into()));
            stream.next().await.unwrap().unwrap();
            assert_eq!(f.store.broadcaster().subscriber_count(&"k".into()), 1);
        }
        assert_eq!(f.store.broadcaster().subscriber_count(&"k".into()), 0);
        assert_eq!(f.store.invalidate(&"k".into()), 0);
    }
}
