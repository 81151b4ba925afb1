//! Real-time change notifications.
//!
//! A [`ChangeFeed`] turns a channel subscription into a stream of
//! [`ChangeEvent`]s. [`RealtimeBridge`] sits on top and invalidates the
//! query cache whenever anything changes.

mod bridge;
mod client;
pub mod messages;

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use bridge::{RealtimeBridge, Subscription};
pub use client::RealtimeClient;
pub use messages::{ChangeEvent, ChangeKind};

/// Which table to watch, under which channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
  pub name: String,
  pub schema: String,
  pub table: String,
}

impl ChannelSpec {
  pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      schema: "public".to_string(),
      table: table.into(),
    }
  }

  /// Phoenix topic for this channel
  pub fn topic(&self) -> String {
    format!("realtime:{}", self.name)
  }
}

/// A live subscription: events plus the means to stop producing them.
pub struct ChangeStream {
  pub events: mpsc::Receiver<ChangeEvent>,
  cancel: CancellationToken,
  task: Option<JoinHandle<()>>,
}

impl ChangeStream {
  pub fn new(
    events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
  ) -> Self {
    Self {
      events,
      cancel,
      task,
    }
  }

  /// Stop the producer and wait for it to finish.
  pub async fn close(mut self) {
    self.cancel.cancel();
    if let Some(task) = self.task.take() {
      if let Err(e) = task.await {
        tracing::warn!(error = %e, "Change feed task ended abnormally");
      }
    }
  }
}

impl Drop for ChangeStream {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Source of change notifications.
pub trait ChangeFeed: Send + Sync + 'static {
  fn subscribe(&self, channel: &ChannelSpec) -> impl Future<Output = Result<ChangeStream>> + Send;
}
