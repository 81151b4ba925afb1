//! Query observers over the cache.
//!
//! Inspired by TanStack Query, a `Query<T>` wraps a cache-backed fetch
//! and tracks its loading/success/error state for a view. The previous
//! data stays visible while a refetch is in flight.
//!
//! # Example
//!
//! ```ignore
//! let gateway = cached_gateway.clone();
//! let mut query = Query::new(move || {
//!     let gateway = gateway.clone();
//!     async move { gateway.stories(&StoryFilter::default()).await }
//! });
//!
//! // Mount: fetch through the cache
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, re-render
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cache::{CacheResult, CacheSource};
use crate::error::Result;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// First fetch in flight, nothing to show yet
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<CacheResult<T>>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Observer of one cached query.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<CacheResult<T>>>>,
  source: Option<CacheSource>,
  fetched_at: Option<Instant>,
  refetch_interval: Option<Duration>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a query with the given fetcher.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheResult<T>>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      source: None,
      fetched_at: None,
      refetch_interval: None,
    }
  }

  /// Refetch periodically while mounted; see [`Query::due_for_refetch`].
  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// A fetch is in flight (first load or background refetch).
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Where the current data came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// True once the refetch interval has elapsed since the last result.
  pub fn due_for_refetch(&self) -> bool {
    match (self.refetch_interval, self.fetched_at) {
      (Some(interval), Some(at)) => !self.is_fetching() && at.elapsed() >= interval,
      _ => false,
    }
  }

  /// Start fetching unless a fetch is already in flight.
  pub fn fetch(&mut self) {
    if self.is_fetching() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, discarding any pending result.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Stop observing. A pending result is discarded when it lands.
  pub fn unmount(&mut self) {
    self.receiver = None;
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed. Call this in the event loop.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        self.state = QueryState::Error("Query was cancelled".to_string());
        true
      }
    }
  }

  /// Wait for the pending fetch, if any. Returns `true` if the state changed.
  #[allow(dead_code)]
  pub async fn settle(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let result = receiver.recv().await;
    self.receiver = None;
    match result {
      Some(result) => self.apply(result),
      None => self.state = QueryState::Error("Query was cancelled".to_string()),
    }
    true
  }

  fn apply(&mut self, result: Result<CacheResult<T>>) {
    self.fetched_at = Some(Instant::now());
    match result {
      Ok(result) => {
        self.source = Some(result.source);
        self.state = QueryState::Success(result.data);
      }
      Err(e) => {
        self.source = None;
        self.state = QueryState::Error(e.to_string());
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if !self.state.is_success() {
      self.state = QueryState::Loading;
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      // Receiver may be gone after unmount
      let _ = tx.send(future.await);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("source", &self.source)
      .field("fetched_at", &self.fetched_at)
      .field("refetch_interval", &self.refetch_interval)
      .finish_non_exhaustive()
  }
}
