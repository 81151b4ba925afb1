use chrono::Utc;
use color_eyre::Result;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::{PostgrestBackend, TableBackend, STORIES_TABLE};
use crate::cache::{NoopStorage, QueryCache, SqliteStorage};
use crate::commands::{self, Command};
use crate::config::{Config, StorageKind};
use crate::error::Error;
use crate::event::{Event, EventHandler};
use crate::gateway::types::{FeedStats, Story, StoryFilter};
use crate::gateway::{CachedGateway, Gateway, Operation};
use crate::query::{Query, QueryState};
use crate::realtime::{ChangeFeed, ChannelSpec, RealtimeBridge, RealtimeClient, Subscription};
use crate::render;

const TICK_RATE: Duration = Duration::from_millis(250);

/// Main application state
pub struct App<B, F> {
  config: Config,
  gateway: CachedGateway<B>,
  /// None when realtime is disabled
  bridge: Option<RealtimeBridge<F>>,
}

impl App<PostgrestBackend, RealtimeClient> {
  /// Build the production stack from configuration.
  pub fn connect(config: Config) -> Result<Self> {
    let url = config.backend_url()?;
    let key = Config::anon_key()?;

    let cache = match config.cache.storage {
      StorageKind::Memory => QueryCache::in_memory(),
      StorageKind::Sqlite => QueryCache::new(SqliteStorage::open_in_memory()?),
      StorageKind::Disabled => QueryCache::new(NoopStorage),
    }
    .with_options(config.cache.options());

    let backend = PostgrestBackend::new(&url, key.clone())?;
    let gateway = CachedGateway::new(Gateway::new(backend), cache.clone());

    let bridge = if config.realtime.enabled {
      let client = RealtimeClient::new(&url, key, config.realtime.heartbeat())?;
      Some(RealtimeBridge::new(client, cache).with_prefixes(config.realtime.invalidate.clone()))
    } else {
      None
    };

    tracing::debug!(url = %url, storage = ?config.cache.storage, "Connected");
    Ok(Self::new(config, gateway, bridge))
  }
}

impl<B: TableBackend, F: ChangeFeed> App<B, F> {
  pub fn new(config: Config, gateway: CachedGateway<B>, bridge: Option<RealtimeBridge<F>>) -> Self {
    Self {
      config,
      gateway,
      bridge,
    }
  }

  /// Run one command, writing its output to `out`.
  ///
  /// Data-layer failures come back as `crate::error::Error` inside the
  /// report so the caller can render them.
  pub async fn run<W: Write + Send>(&self, command: Command, out: &mut W) -> Result<()> {
    match command {
      Command::Stories { filter, limit } => {
        let result = self.gateway.stories(&filter.to_filter()).await?;
        write_feed(out, &result.data, limit)?;
        if let Some(note) = render::source_note(result.source, result.cached_at) {
          writeln!(out, "{}", note)?;
        }
      }
      Command::Story { id } => {
        let id = commands::record_id(&id);
        match self.gateway.story(&id).await {
          Ok(result) => {
            writeln!(out, "{}", render::story_detail(&result.data, Utc::now()))?;
            if let Some(note) = render::source_note(result.source, result.cached_at) {
              writeln!(out, "{}", note)?;
            }
          }
          Err(e @ Error::NotFound { .. }) => writeln!(out, "{}", render::error_message(&e))?,
          Err(e) => return Err(e.into()),
        }
      }
      Command::Submit(args) => {
        let story = self.gateway.submit_story(args.into()).await?;
        writeln!(
          out,
          "Story #{} submitted. Thank you for sharing, {}.",
          story.id, story.name
        )?;
      }
      Command::RegisterNgo(args) => {
        let ngo = self.gateway.register_ngo(args.into()).await?;
        writeln!(
          out,
          "Registered {}. We will connect you with stories in {}.",
          ngo.name,
          ngo.focus_areas.join(", ")
        )?;
      }
      Command::Review => {
        let result = self.gateway.admin_stories().await?;
        let pending: Vec<Story> = result
          .data
          .into_iter()
          .filter(|story| !story.help_approved)
          .collect();
        if pending.is_empty() {
          writeln!(out, "Nothing waiting for review.")?;
        }
        let now = Utc::now();
        for story in &pending {
          writeln!(out, "{}", render::story_line(story, now))?;
        }
      }
      Command::ApproveHelp { id } => {
        let story = self.gateway.approve_help(&commands::record_id(&id)).await?;
        writeln!(out, "Help approved for story #{}: {}", story.id, story.title)?;
      }
      Command::Ngos => {
        let result = self.gateway.ngos().await?;
        if result.data.is_empty() {
          writeln!(out, "No NGOs registered yet.")?;
        }
        for ngo in &result.data {
          writeln!(out, "{}", render::ngo_line(ngo))?;
        }
        if let Some(note) = render::source_note(result.source, result.cached_at) {
          writeln!(out, "{}", note)?;
        }
      }
      Command::Stats => {
        let stories = self.gateway.stories(&StoryFilter::default()).await?;
        let ngos = self.gateway.ngos().await?;
        let stats = FeedStats::from_feed(&stories.data, &ngos.data);
        writeln!(out, "{}", render::stats(&stats))?;
      }
      Command::Request {
        method,
        endpoint,
        body,
      } => {
        let body = body
          .map(|raw| {
            serde_json::from_str(&raw)
              .map_err(|e| Error::field("body", format!("Body is not valid JSON: {}", e)))
          })
          .transpose()?;
        let operation = Operation::resolve(&method, &endpoint, body)?;
        let value = self.gateway.request(operation).await?;
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
      }
      Command::Watch { filter, limit } => {
        self.watch(filter.to_filter(), limit, out).await?;
      }
    }
    Ok(())
  }

  /// Keep a feed view mounted until Ctrl-C.
  async fn watch<W: Write + Send>(
    &self,
    filter: StoryFilter,
    limit: Option<usize>,
    out: &mut W,
  ) -> Result<()> {
    let mut events = EventHandler::new(TICK_RATE);

    let mut query = self.feed_query(filter);
    query.fetch();

    let subscription = self.subscribe(events.sender()).await;
    if subscription.is_none() {
      writeln!(out, "Live updates unavailable; refreshing periodically.")?;
    }

    while let Some(event) = events.next().await {
      match event {
        Event::Tick => {
          if query.poll() {
            render_query(out, &query, limit)?;
          }
          if query.due_for_refetch() {
            tracing::debug!("Periodic refetch");
            query.refetch();
          }
        }
        Event::Changed(change) => {
          tracing::debug!(table = %change.table, kind = ?change.kind, "Feed changed, refetching");
          query.refetch();
        }
        Event::Shutdown => break,
      }
    }

    query.unmount();
    if let Some((subscription, forward)) = subscription {
      subscription.unsubscribe().await;
      forward.abort();
    }
    Ok(())
  }

  /// Feed observer for `watch`. Every fetch (mount, periodic, on change)
  /// bypasses the freshness window.
  fn feed_query(&self, filter: StoryFilter) -> Query<Vec<Story>> {
    let gateway = self.gateway.clone();
    let query = Query::new(move || {
      let gateway = gateway.clone();
      let filter = filter.clone();
      async move { gateway.refetch_stories(&filter).await }
    });
    match self.config.watch.refetch_interval() {
      Some(interval) => query.with_refetch_interval(interval),
      None => query,
    }
  }

  /// Activate the bridge and forward its notifications into the event loop.
  async fn subscribe(
    &self,
    sender: mpsc::UnboundedSender<Event>,
  ) -> Option<(Subscription, tokio::task::JoinHandle<()>)> {
    let bridge = self.bridge.as_ref()?;
    let channel = ChannelSpec::new(self.config.realtime.channel.clone(), STORIES_TABLE);

    let subscription = match bridge.activate(channel).await {
      Ok(subscription) => subscription,
      Err(e) => {
        tracing::warn!(error = %e, "Realtime unavailable");
        return None;
      }
    };

    let mut notifications = subscription.notifications();
    let forward = tokio::spawn(async move {
      loop {
        match notifications.recv().await {
          Ok(change) => {
            if sender.send(Event::Changed(change)).is_err() {
              break;
            }
          }
          Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "Notifications lagged");
          }
          Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    Some((subscription, forward))
  }
}

fn write_feed<W: Write>(out: &mut W, stories: &[Story], limit: Option<usize>) -> std::io::Result<()> {
  if stories.is_empty() {
    writeln!(out, "No stories found.")?;
  }
  let now = Utc::now();
  for story in stories.iter().take(limit.unwrap_or(usize::MAX)) {
    writeln!(out, "{}", render::story_line(story, now))?;
  }
  Ok(())
}

fn render_query<W: Write>(
  out: &mut W,
  query: &Query<Vec<Story>>,
  limit: Option<usize>,
) -> std::io::Result<()> {
  writeln!(out, "--- {} ---", Utc::now().format("%H:%M:%S"))?;
  match query.state() {
    QueryState::Success(stories) => {
      write_feed(out, stories, limit)?;
      match query.source().and_then(|source| render::source_note(source, None)) {
        Some(note) => writeln!(out, "{}", note),
        None => Ok(()),
      }
    }
    QueryState::Error(e) => writeln!(out, "Error: {}", e),
    QueryState::Idle | QueryState::Loading => writeln!(out, "Loading..."),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::memory::MemoryBackend;
  use crate::commands::FilterArgs;
  use crate::gateway::types::tests::new_story;

  type TestApp = App<MemoryBackend, RealtimeClient>;

  fn app() -> (TestApp, MemoryBackend) {
    let backend = MemoryBackend::new();
    let gateway = CachedGateway::new(Gateway::new(backend.clone()), QueryCache::in_memory());
    (App::new(Config::default(), gateway, None), backend)
  }

  async fn run(app: &TestApp, command: Command) -> (Result<()>, String) {
    let mut out = Vec::new();
    let result = app.run(command, &mut out).await;
    (result, String::from_utf8(out).unwrap())
  }

  #[tokio::test]
  async fn test_empty_feed() {
    let (app, _) = app();
    let (result, out) = run(
      &app,
      Command::Stories {
        filter: FilterArgs::default(),
        limit: None,
      },
    )
    .await;
    result.unwrap();
    assert_eq!(out, "No stories found.\n");
  }

  #[tokio::test]
  async fn test_submit_then_list() {
    let (app, _) = app();
    app.gateway.submit_story(new_story()).await.unwrap();

    let (result, out) = run(
      &app,
      Command::Stories {
        filter: FilterArgs::default(),
        limit: Some(5),
      },
    )
    .await;
    result.unwrap();
    assert!(out.contains("Need books"));
    assert!(out.contains("Pune, Maharashtra"));
  }

  #[tokio::test]
  async fn test_missing_story_renders_not_found() {
    let (app, _) = app();
    let (result, out) = run(
      &app,
      Command::Story {
        id: "nonexistent-id".to_string(),
      },
    )
    .await;
    result.unwrap();
    assert!(out.starts_with("No story with id nonexistent-id"));
  }

  #[tokio::test]
  async fn test_review_lists_only_pending() {
    let (app, _) = app();
    let first = app.gateway.submit_story(new_story()).await.unwrap();
    let mut other = new_story();
    other.title = "Clinic roof leaking".to_string();
    app.gateway.submit_story(other).await.unwrap();
    app.gateway.approve_help(&first.id).await.unwrap();

    let (result, out) = run(&app, Command::Review).await;
    result.unwrap();
    assert!(out.contains("Clinic roof leaking"));
    assert!(!out.contains("Need books"));
  }

  #[tokio::test]
  async fn test_failed_approval_is_returned() {
    let (app, backend) = app();
    let (result, _) = run(
      &app,
      Command::ApproveHelp {
        id: "41".to_string(),
      },
    )
    .await;
    let report = result.unwrap_err();
    assert!(matches!(
      report.downcast_ref::<Error>(),
      Some(Error::NotFound { .. })
    ));
    assert_eq!(backend.updates(), 1);
  }

  #[tokio::test]
  async fn test_request_unknown_endpoint() {
    let (app, _) = app();
    let (result, _) = run(
      &app,
      Command::Request {
        method: "GET".to_string(),
        endpoint: "/api/volunteers".to_string(),
        body: None,
      },
    )
    .await;
    assert!(matches!(
      result.unwrap_err().downcast_ref::<Error>(),
      Some(Error::UnsupportedOperation { .. })
    ));
  }

  #[tokio::test]
  async fn test_request_bad_json_body() {
    let (app, backend) = app();
    let (result, _) = run(
      &app,
      Command::Request {
        method: "POST".to_string(),
        endpoint: "/api/stories".to_string(),
        body: Some("{not json".to_string()),
      },
    )
    .await;
    assert!(matches!(
      result.unwrap_err().downcast_ref::<Error>(),
      Some(Error::Validation(_))
    ));
    assert_eq!(backend.calls(), 0);
  }

  #[tokio::test]
  async fn test_feed_refetch_sees_new_rows() {
    let (app, backend) = app();
    app.gateway.submit_story(new_story()).await.unwrap();

    let mut query = app.feed_query(StoryFilter::default());
    query.fetch();
    query.settle().await;
    assert_eq!(query.data().map(Vec::len), Some(1));

    // Written elsewhere while the cached feed is still fresh
    backend.seed(
      STORIES_TABLE,
      serde_json::json!({
        "id": 90,
        "name": "Ravi",
        "email": "ravi@x.com",
        "city": "Patna",
        "state": "bihar",
        "category": "health",
        "title": "Clinic roof leaking",
        "story": "Rain gets in",
        "created_at": "2024-08-20T10:00:00Z"
      }),
    );
    assert_eq!(
      app.gateway.stories(&StoryFilter::default()).await.unwrap().data.len(),
      1
    );

    query.refetch();
    query.settle().await;
    let stories = query.data().unwrap();
    assert_eq!(stories.len(), 2);
    assert_eq!(stories[0].title, "Clinic roof leaking");
  }

  #[tokio::test]
  async fn test_stats() {
    let (app, _) = app();
    app.gateway.submit_story(new_story()).await.unwrap();
    let (result, out) = run(&app, Command::Stats).await;
    result.unwrap();
    assert!(out.contains("Stories shared:   1"));
    assert!(out.contains("NGOs connected:   0"));
  }
}
