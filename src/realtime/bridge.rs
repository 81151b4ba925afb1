//! Bridge from change notifications to cache invalidation.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::QueryCache;
use crate::error::{Error, Result};
use crate::gateway::cache::{STORIES_PREFIX, STORY_PREFIX};

use super::{ChangeEvent, ChangeFeed, ChannelSpec};

const NOTIFICATION_BUFFER: usize = 16;

/// Invalidates cached story queries whenever the watched table changes.
///
/// Invalidation is coarse: every notification marks every key under the
/// configured prefixes stale, whatever the payload says.
pub struct RealtimeBridge<F> {
  feed: Arc<F>,
  cache: QueryCache,
  prefixes: Vec<String>,
  active: Arc<Mutex<HashSet<String>>>,
}

impl<F: ChangeFeed> RealtimeBridge<F> {
  pub fn new(feed: F, cache: QueryCache) -> Self {
    Self {
      feed: Arc::new(feed),
      cache,
      prefixes: vec![STORIES_PREFIX.to_string(), STORY_PREFIX.to_string()],
      active: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.prefixes = prefixes.into_iter().map(Into::into).collect();
    self
  }

  #[allow(dead_code)]
  pub fn is_active(&self, channel: &str) -> bool {
    lock(&self.active).contains(channel)
  }

  /// Subscribe to `channel` and start invalidating on its notifications.
  ///
  /// Fails if a subscription under the same channel name is still live.
  pub async fn activate(&self, channel: ChannelSpec) -> Result<Subscription> {
    if !lock(&self.active).insert(channel.name.clone()) {
      return Err(Error::Realtime(format!(
        "channel '{}' is already subscribed",
        channel.name
      )));
    }

    let mut stream = match self.feed.subscribe(&channel).await {
      Ok(stream) => stream,
      Err(e) => {
        lock(&self.active).remove(&channel.name);
        return Err(e);
      }
    };

    let (notify, _) = broadcast::channel(NOTIFICATION_BUFFER);
    let cancel = CancellationToken::new();

    let task = {
      let cache = self.cache.clone();
      let prefixes = self.prefixes.clone();
      let active = Arc::clone(&self.active);
      let notify = notify.clone();
      let cancel = cancel.clone();
      let name = channel.name.clone();

      tokio::spawn(async move {
        loop {
          tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.events.recv() => {
              let Some(event) = event else {
                tracing::info!(channel = %name, "Change feed ended");
                break;
              };
              invalidate(&cache, &prefixes, &name, &event);
              // No observers is fine
              let _ = notify.send(event);
            }
          }
        }

        stream.close().await;
        lock(&active).remove(&name);
        tracing::debug!(channel = %name, "Subscription released");
      })
    };

    tracing::info!(channel = %channel.name, table = %channel.table, "Realtime bridge active");
    Ok(Subscription {
      channel: channel.name,
      cancel,
      task: Some(task),
      notify,
    })
  }
}

fn invalidate(cache: &QueryCache, prefixes: &[String], channel: &str, event: &ChangeEvent) {
  for prefix in prefixes {
    match cache.invalidate_prefix(prefix) {
      Ok(count) => {
        tracing::debug!(channel, table = %event.table, kind = ?event.kind, prefix = %prefix, count, "Invalidated on change");
      }
      Err(e) => {
        tracing::warn!(channel, prefix = %prefix, error = %e, "Failed to invalidate on change");
      }
    }
  }
}

fn lock(active: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
  active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a live channel subscription.
///
/// Call [`Subscription::unsubscribe`] to release it. Dropping the handle
/// also cancels the subscription, but without waiting for teardown.
pub struct Subscription {
  channel: String,
  cancel: CancellationToken,
  task: Option<JoinHandle<()>>,
  notify: broadcast::Sender<ChangeEvent>,
}

impl Subscription {
  pub fn channel(&self) -> &str {
    &self.channel
  }

  /// Receiver for notifications arriving after this call. The cache has
  /// already been invalidated by the time an event is delivered.
  pub fn notifications(&self) -> broadcast::Receiver<ChangeEvent> {
    self.notify.subscribe()
  }

  /// Tear down the subscription and wait until the channel name is free.
  pub async fn unsubscribe(mut self) {
    self.cancel.cancel();
    if let Some(task) = self.task.take() {
      if let Err(e) = task.await {
        tracing::warn!(channel = %self.channel, error = %e, "Subscription task failed");
      }
    }
    tracing::info!(channel = %self.channel, "Unsubscribed");
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("channel", &self.channel)
      .field("live", &self.task.is_some())
      .finish()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if self.task.is_some() {
      tracing::warn!(channel = %self.channel, "Subscription dropped without unsubscribe");
      self.cancel.cancel();
    }
  }
}
