//! Query cache that orchestrates freshness, revalidation and retries.

use chrono::{Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::storage::{CacheStorage, CachedEntry, MemoryStorage};
use super::traits::{CacheResult, Cacheable, QueryKey};
use crate::error::Result;

/// Tuning knobs for the cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
  /// How long a fetched value counts as fresh
  pub stale_time: Duration,
  /// Extra attempts after a failed fetch
  pub retry: u32,
  /// Pause before each retry
  pub retry_delay: std::time::Duration,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::seconds(30),
      retry: 1,
      retry_delay: std::time::Duration::from_secs(1),
    }
  }
}

/// Keyed store of query results with stale-while-revalidate reads.
///
/// Cloning is cheap; clones share the same storage. Build one per
/// session (or per test) and hand it to whoever needs it.
#[derive(Clone)]
pub struct QueryCache {
  storage: Arc<dyn CacheStorage>,
  options: CacheOptions,
}

impl QueryCache {
  /// Create a new cache over the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      options: CacheOptions::default(),
    }
  }

  pub fn in_memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  pub fn with_options(mut self, options: CacheOptions) -> Self {
    self.options = options;
    self
  }

  /// Read through the cache.
  ///
  /// 1. Fresh entry: return it, no fetch.
  /// 2. Stale by age: return it at once and refresh in the background.
  /// 3. Invalidated: refetch before returning; on failure serve the old value.
  /// 4. Missing: fetch; errors surface to the caller.
  pub async fn get<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cache_key = key.cache_key();

    let Some((cached, entry)) = self.read::<T>(&cache_key)? else {
      tracing::debug!(key = %cache_key, query = %key.description(), "Cache miss");
      return self.revalidate(&cache_key, None, &fetcher).await;
    };

    if entry.is_fresh(Utc::now()) {
      return Ok(CacheResult::from_cache(cached, entry.fetched_at, false));
    }

    if !entry.invalidated {
      tracing::debug!(key = %cache_key, "Serving stale entry, revalidating");
      self.spawn_refresh(cache_key, fetcher);
      return Ok(CacheResult::from_cache(cached, entry.fetched_at, true));
    }

    tracing::debug!(key = %cache_key, "Entry invalidated, refetching");
    self
      .revalidate(&cache_key, Some((cached, entry)), &fetcher)
      .await
  }

  /// Fetch now regardless of freshness (mount / focus refetch).
  ///
  /// Same failure policy as an invalidated `get`: the previous value, if
  /// any, is served as offline.
  pub async fn refetch<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<T>>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cache_key = key.cache_key();
    let previous = self.read::<T>(&cache_key)?;
    self.revalidate(&cache_key, previous, &fetcher).await
  }

  /// Read without fetching. Freshness is reported but nothing is refreshed.
  #[allow(dead_code)]
  pub fn peek<K, T>(&self, key: &K) -> Result<Option<CacheResult<T>>>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
  {
    Ok(
      self
        .read::<T>(&key.cache_key())?
        .map(|(data, entry)| {
          let stale = !entry.is_fresh(Utc::now());
          CacheResult::from_cache(data, entry.fetched_at, stale)
        }),
    )
  }

  /// Store a fresh value, timestamped now.
  pub fn set<K, T>(&self, key: &K, value: &T) -> Result<()>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
  {
    let cache_key = key.cache_key();
    let generation = self.generation(&cache_key)?;
    self.store(&cache_key, value, generation)
  }

  /// Mark one entry stale so the next `get` refetches.
  pub fn invalidate<K: QueryKey + ?Sized>(&self, key: &K) -> Result<bool> {
    let cache_key = key.cache_key();
    let found = self.storage.invalidate(&cache_key)?;
    tracing::debug!(key = %cache_key, found, "Invalidated");
    Ok(found)
  }

  /// Mark every entry under `prefix` stale.
  pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    let count = self.storage.invalidate_prefix(prefix)?;
    tracing::debug!(prefix, count, "Invalidated prefix");
    Ok(count)
  }

  async fn revalidate<T, F, Fut>(
    &self,
    cache_key: &str,
    previous: Option<(T, CachedEntry)>,
    fetcher: &F,
  ) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    match self.fetch_and_store(cache_key, fetcher).await {
      Ok(data) => Ok(CacheResult::from_network(data)),
      Err(e) => match previous {
        Some((cached, entry)) => {
          tracing::warn!(key = %cache_key, error = %e, "Refetch failed, serving previous value");
          Ok(CacheResult::offline(cached, entry.fetched_at))
        }
        None => Err(e),
      },
    }
  }

  fn spawn_refresh<T, F, Fut>(&self, cache_key: String, fetcher: F) -> JoinHandle<()>
  where
    T: Cacheable,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cache = self.clone();
    tokio::spawn(async move {
      if let Err(e) = cache.fetch_and_store(&cache_key, &fetcher).await {
        tracing::warn!(key = %cache_key, error = %e, "Background refresh failed");
      }
    })
  }

  /// Fetch and store under the generation seen before the fetch started,
  /// so an invalidation that lands mid-flight is not overwritten.
  async fn fetch_and_store<T, F, Fut>(&self, cache_key: &str, fetcher: &F) -> Result<T>
  where
    T: Cacheable,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let generation = self.generation(cache_key)?;
    let data = self.fetch_with_retry(cache_key, fetcher).await?;
    self.store(cache_key, &data, generation)?;
    Ok(data)
  }

  /// Run the fetcher, retrying transient failures up to `retry` times.
  async fn fetch_with_retry<T, F, Fut>(&self, cache_key: &str, fetcher: &F) -> Result<T>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match fetcher().await {
        Ok(data) => return Ok(data),
        Err(e) if attempt < self.options.retry && e.is_transient() => {
          attempt += 1;
          tracing::warn!(key = %cache_key, attempt, error = %e, "Fetch failed, retrying");
          tokio::time::sleep(self.options.retry_delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }

  fn generation(&self, cache_key: &str) -> Result<u64> {
    Ok(self.storage.get(cache_key)?.map_or(0, |entry| entry.generation))
  }

  fn read<T: Cacheable>(&self, cache_key: &str) -> Result<Option<(T, CachedEntry)>> {
    let Some(entry) = self.storage.get(cache_key)? else {
      return Ok(None);
    };

    match serde_json::from_value::<T>(entry.payload.clone()) {
      Ok(data) => Ok(Some((data, entry))),
      Err(e) => {
        // Shape changed under the same key; treat as a miss.
        tracing::warn!(key = %cache_key, error = %e, "Discarding undecodable cache entry");
        Ok(None)
      }
    }
  }

  fn store<T: Cacheable>(&self, cache_key: &str, data: &T, generation: u64) -> Result<()> {
    let payload = serde_json::to_value(data)
      .map_err(|e| crate::error::Error::Storage(format!("Failed to encode value: {}", e)))?;
    let entry = CachedEntry::new(payload, self.options.stale_time).with_generation(generation);
    self.storage.put(cache_key, &entry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::CacheSource;
  use crate::error::Error;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn quick_cache() -> QueryCache {
    QueryCache::in_memory().with_options(CacheOptions {
      retry_delay: std::time::Duration::ZERO,
      ..CacheOptions::default()
    })
  }

  /// Fetcher returning the call number, counting calls.
  fn counting(calls: &Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<Result<usize>> {
    let calls = calls.clone();
    move || futures::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
  }

  /// Fetcher failing the first `failures` calls.
  fn flaky(
    calls: &Arc<AtomicUsize>,
    failures: usize,
  ) -> impl Fn() -> futures::future::Ready<Result<usize>> {
    let calls = calls.clone();
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n <= failures {
        futures::future::ready(Err(Error::Remote(format!("failure {}", n))))
      } else {
        futures::future::ready(Ok(n))
      }
    }
  }

  #[tokio::test]
  async fn test_fresh_get_does_not_refetch() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache.get("stories-list", counting(&calls)).await.unwrap();
    let second = cache.get("stories-list", counting(&calls)).await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(first.data, second.data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_forces_exactly_one_refetch() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("story:1", counting(&calls)).await.unwrap();
    assert!(cache.invalidate("story:1").unwrap());

    let result = cache.get("story:1", counting(&calls)).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Fresh again afterwards
    cache.get("story:1", counting(&calls)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_repeated_invalidation_is_idempotent() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("stories-list", counting(&calls)).await.unwrap();
    cache.invalidate_prefix("stories-list").unwrap();
    cache.invalidate_prefix("stories-list").unwrap();
    cache.get("stories-list", counting(&calls)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_stale_entry_served_while_revalidating() {
    let cache = QueryCache::in_memory().with_options(CacheOptions {
      stale_time: Duration::zero(),
      retry: 1,
      retry_delay: std::time::Duration::ZERO,
    });
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("ngos-list", counting(&calls)).await.unwrap();
    let stale = cache.get("ngos-list", counting(&calls)).await.unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);
    assert_eq!(stale.data, 1);

    // Let the background refresh land
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let peeked: CacheResult<usize> = cache.peek("ngos-list").unwrap().unwrap();
    assert_eq!(peeked.data, 2);
  }

  #[tokio::test]
  async fn test_retries_once_then_succeeds() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = cache.get("stories-list", flaky(&calls, 1)).await.unwrap();
    assert_eq!(result.data, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_error_surfaces_after_one_retry_without_prior_value() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let err = cache
      .get("stories-list", flaky(&calls, 5))
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "failure 2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.peek::<_, usize>("stories-list").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_previous_value() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    cache.set("stories-list", &7usize).unwrap();
    cache.invalidate("stories-list").unwrap();

    let result = cache
      .get("stories-list", flaky(&calls, 5))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_not_found_is_not_retried() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let err = cache
      .get("story:missing", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err::<usize, _>(Error::NotFound {
          resource: "story",
          id: "missing".to_string(),
        }))
      })
      .await
      .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_refetch_ignores_freshness() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("stories-list", counting(&calls)).await.unwrap();
    let refetched = cache.refetch("stories-list", counting(&calls)).await.unwrap();
    assert_eq!(refetched.source, CacheSource::Network);
    assert_eq!(refetched.data, 2);

    let result: CacheResult<usize> = cache.peek("stories-list").unwrap().unwrap();
    assert_eq!(result.data, 2);
    assert_eq!(result.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_failed_refetch_serves_previous_as_offline() {
    let cache = quick_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    cache.set("ngos-list", &7usize).unwrap();

    let result = cache.refetch("ngos-list", flaky(&calls, 5)).await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, 7);

    let missing = cache.refetch("admin-stories", flaky(&calls, 5)).await;
    assert!(missing.is_err());
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_is_kept() {
    let cache = quick_cache();
    let version = Arc::new(AtomicUsize::new(1));
    cache.set("stories-list", &1usize).unwrap();

    // Snapshot the data, then take a while to answer
    let slow = {
      let version = version.clone();
      move || {
        let seen = version.load(Ordering::SeqCst);
        async move {
          tokio::time::sleep(std::time::Duration::from_millis(50)).await;
          Ok::<usize, Error>(seen)
        }
      }
    };
    let in_flight = {
      let cache = cache.clone();
      tokio::spawn(async move { cache.refetch("stories-list", slow).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    version.store(2, Ordering::SeqCst);
    cache.invalidate_prefix("stories-list").unwrap();
    assert_eq!(in_flight.await.unwrap().unwrap().data, 1);

    let current = {
      let version = version.clone();
      move || futures::future::ready(Ok::<usize, Error>(version.load(Ordering::SeqCst)))
    };
    let result = cache.get("stories-list", current).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, 2);
  }

  #[tokio::test]
  async fn test_background_refresh_keeps_later_invalidation() {
    let cache = QueryCache::in_memory().with_options(CacheOptions {
      stale_time: Duration::zero(),
      retry: 1,
      retry_delay: std::time::Duration::ZERO,
    });
    cache.set("story:1", &1usize).unwrap();

    let slow = || async {
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      Ok::<usize, Error>(1)
    };
    let stale = cache.get("story:1", slow).await.unwrap();
    assert_eq!(stale.source, CacheSource::CacheStale);

    // Let the refresh start before invalidating
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    cache.invalidate("story:1").unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    let calls = Arc::new(AtomicUsize::new(1));
    let result = cache.get("story:1", counting(&calls)).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, 2);
  }

  #[tokio::test]
  async fn test_sqlite_storage_behaves_the_same() {
    let cache = QueryCache::new(SqliteStorage::open_in_memory().unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    cache.get("ngos-list", counting(&calls)).await.unwrap();
    cache.get("ngos-list", counting(&calls)).await.unwrap();
    cache.invalidate_prefix("ngos").unwrap();
    cache.get("ngos-list", counting(&calls)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
