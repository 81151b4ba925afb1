//! Cached gateway that wraps `Gateway` with the query cache.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::backend::TableBackend;
use crate::cache::{CacheResult, QueryCache};
use crate::error::Result;

use super::cache::{ResourceKey, STORIES_PREFIX};
use super::client::Gateway;
use super::operation::Operation;
use super::types::{NewNgo, NewStory, Ngo, RecordId, Story, StoryFilter};

/// Gateway with transparent caching.
///
/// Reads go through the cache; writes go straight to the gateway and then
/// invalidate whatever they made stale.
pub struct CachedGateway<B> {
  inner: Gateway<B>,
  cache: QueryCache,
}

impl<B> Clone for CachedGateway<B> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      cache: self.cache.clone(),
    }
  }
}

impl<B: TableBackend> CachedGateway<B> {
  pub fn new(inner: Gateway<B>, cache: QueryCache) -> Self {
    Self { inner, cache }
  }

  /// The feed, filtered client-side and cached per filter.
  pub async fn stories(&self, filter: &StoryFilter) -> Result<CacheResult<Vec<Story>>> {
    let key = ResourceKey::Stories(filter.clone());
    let fetcher = self.stories_fetcher(filter);
    self.cache.get(&key, fetcher).await
  }

  pub async fn story(&self, id: &RecordId) -> Result<CacheResult<Story>> {
    let inner = self.inner.clone();
    let fetch_id = id.clone();
    self
      .cache
      .get(&ResourceKey::Story(id.clone()), move || {
        let inner = inner.clone();
        let id = fetch_id.clone();
        async move { inner.get_story(&id).await }
      })
      .await
  }

  pub async fn ngos(&self) -> Result<CacheResult<Vec<Ngo>>> {
    let inner = self.inner.clone();
    self
      .cache
      .get(&ResourceKey::Ngos, move || {
        let inner = inner.clone();
        async move { inner.list_ngos().await }
      })
      .await
  }

  /// Moderation view. Same rows as the feed, cached under its own key.
  pub async fn admin_stories(&self) -> Result<CacheResult<Vec<Story>>> {
    let inner = self.inner.clone();
    self
      .cache
      .get(&ResourceKey::AdminStories, move || {
        let inner = inner.clone();
        async move { inner.list_stories().await }
      })
      .await
  }

  /// Submit a story; every feed view is stale afterwards.
  pub async fn submit_story(&self, fields: NewStory) -> Result<Story> {
    let story = self.inner.create_story(fields).await?;
    self.cache.invalidate_prefix(STORIES_PREFIX)?;
    self.cache.set(&ResourceKey::Story(story.id.clone()), &story)?;
    Ok(story)
  }

  /// Register an NGO; the NGO list is stale afterwards.
  pub async fn register_ngo(&self, fields: NewNgo) -> Result<Ngo> {
    let ngo = self.inner.create_ngo(fields).await?;
    self.cache.invalidate(&ResourceKey::Ngos)?;
    Ok(ngo)
  }

  pub async fn approve_help(&self, id: &RecordId) -> Result<Story> {
    let story = self.inner.approve_help(id).await?;
    self.cache.invalidate(&ResourceKey::AdminStories)?;
    self.cache.invalidate_prefix(STORIES_PREFIX)?;
    self.cache.invalidate(&ResourceKey::Story(id.clone()))?;
    Ok(story)
  }

  /// Execute a routed operation: reads through the cache, writes with
  /// the usual invalidation.
  pub async fn request(&self, operation: Operation) -> Result<Value> {
    let value = match operation {
      Operation::ListStories => serde_json::to_value(self.stories(&StoryFilter::default()).await?.data)?,
      Operation::GetStory(id) => serde_json::to_value(self.story(&id).await?.data)?,
      Operation::CreateStory(fields) => serde_json::to_value(self.submit_story(fields).await?)?,
      Operation::ListNgos => serde_json::to_value(self.ngos().await?.data)?,
      Operation::CreateNgo(fields) => serde_json::to_value(self.register_ngo(fields).await?)?,
      Operation::ApproveHelp(id) => serde_json::to_value(self.approve_help(&id).await?)?,
    };
    Ok(value)
  }

  /// Refetch a feed view regardless of freshness (mount and periodic refetch).
  pub async fn refetch_stories(&self, filter: &StoryFilter) -> Result<CacheResult<Vec<Story>>> {
    let key = ResourceKey::Stories(filter.clone());
    self.cache.refetch(&key, self.stories_fetcher(filter)).await
  }

  fn stories_fetcher(
    &self,
    filter: &StoryFilter,
  ) -> impl Fn() -> BoxFuture<'static, Result<Vec<Story>>> + Send + Sync + 'static {
    let inner = self.inner.clone();
    let filter = filter.clone();
    move || {
      let inner = inner.clone();
      let filter = filter.clone();
      async move { Ok(filter.apply(inner.list_stories().await?)) }.boxed()
    }
  }
}
