//! Network fetcher port.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::cache::{CacheKey, CacheValue};
use crate::error::Result;

/// Producer of fresh values from the network (or any authoritative source)
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> Result<V>;
}

/// Adapts an async closure `Fn(K) -> Future<Output = Result<V>>` to [`Fetcher`]
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFetcher").finish_non_exhaustive()
    }
}

#[async_trait]
impl<K, V, F, Fut> Fetcher<K, V> for FnFetcher<F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    async fn fetch(&self, key: &K) -> Result<V> {
        (self.f)(key.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_fn_fetcher_passes_key() {
        let fetcher = FnFetcher::new(|key: u32| async move { Ok::<_, Error>(key * 2) });
        assert_eq!(fetcher.fetch(&21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fn_fetcher_propagates_error() {
        let fetcher = FnFetcher::new(|key: u32| async move {
            Err::<u32, _>(Error::Fetch(format!("no route for {}", key)))
        });
        assert_matches!(fetcher.fetch(&1).await, Err(Error::Fetch(msg)) if msg == "no route for 1");
    }
}
