//! WebSocket client for the Supabase realtime endpoint.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};

use super::messages::{parse_frame, ChangeEvent, Inbound, PhoenixMessage};
use super::{ChangeFeed, ChangeStream, ChannelSpec};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;

/// Connection settings for the realtime socket.
///
/// Each `subscribe` opens its own socket and joins one channel on it.
#[derive(Clone)]
pub struct RealtimeClient {
  socket_url: Url,
  api_key: String,
  heartbeat: Duration,
}

impl RealtimeClient {
  /// `base` is the project URL (`https://<ref>.supabase.co`).
  pub fn new(base: &Url, api_key: String, heartbeat: Duration) -> Result<Self> {
    Ok(Self {
      socket_url: websocket_url(base, &api_key)?,
      api_key,
      heartbeat,
    })
  }
}

fn websocket_url(base: &Url, api_key: &str) -> Result<Url> {
  let scheme = match base.scheme() {
    "https" | "wss" => "wss",
    "http" | "ws" => "ws",
    other => {
      return Err(Error::Realtime(format!(
        "unsupported URL scheme '{}'",
        other
      )))
    }
  };

  let mut base = base.clone();
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  let mut url = base
    .join("realtime/v1/websocket")
    .map_err(|e| Error::Realtime(format!("invalid realtime URL: {}", e)))?;
  url
    .set_scheme(scheme)
    .map_err(|_| Error::Realtime("invalid realtime URL scheme".to_string()))?;
  url
    .query_pairs_mut()
    .append_pair("apikey", api_key)
    .append_pair("vsn", "1.0.0");

  Ok(url)
}

impl ChangeFeed for RealtimeClient {
  async fn subscribe(&self, channel: &ChannelSpec) -> Result<ChangeStream> {
    let (socket, _response) = connect_async(self.socket_url.as_str()).await?;
    tracing::info!(channel = %channel.name, table = %channel.table, "Realtime socket connected");

    let (mut sink, mut stream) = socket.split();
    let topic = channel.topic();

    sink
      .send(Message::Text(
        PhoenixMessage::join(channel, &self.api_key, 1).to_text()?,
      ))
      .await?;

    tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut stream, &topic))
      .await
      .map_err(|_| Error::Realtime(format!("timed out joining {}", topic)))??;
    tracing::info!(channel = %channel.name, "Joined realtime channel");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(pump(
      sink,
      stream,
      channel.clone(),
      self.heartbeat,
      tx,
      cancel.clone(),
    ));

    Ok(ChangeStream::new(rx, cancel, Some(task)))
  }
}

/// Read frames until the join is acknowledged or refused.
async fn await_join(stream: &mut SplitStream<Socket>, topic: &str) -> Result<()> {
  while let Some(frame) = stream.next().await {
    let Message::Text(text) = frame? else {
      continue;
    };
    match parse_frame(&text, topic)? {
      Inbound::Joined => return Ok(()),
      Inbound::Rejected(reason) => {
        return Err(Error::Realtime(format!("join refused: {}", reason)))
      }
      Inbound::Closed => return Err(Error::Realtime("channel closed while joining".to_string())),
      Inbound::Change(_) | Inbound::Ignored => {}
    }
  }
  Err(Error::Realtime("socket closed while joining".to_string()))
}

/// Forward change events and keep the socket alive until cancelled.
async fn pump(
  mut sink: SplitSink<Socket, Message>,
  mut stream: SplitStream<Socket>,
  channel: ChannelSpec,
  heartbeat: Duration,
  events: mpsc::Sender<ChangeEvent>,
  cancel: CancellationToken,
) {
  let topic = channel.topic();
  let mut next_ref: u64 = 2;
  let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        leave(&mut sink, &channel, next_ref).await;
        break;
      }
      _ = ticker.tick() => {
        let frame = PhoenixMessage::heartbeat(next_ref);
        next_ref += 1;
        let sent = match frame.to_text() {
          Ok(text) => sink.send(Message::Text(text)).await.map_err(Error::from),
          Err(e) => Err(e),
        };
        if let Err(e) = sent {
          tracing::error!(channel = %channel.name, error = %e, "Failed to send heartbeat");
          break;
        }
        tracing::trace!(channel = %channel.name, "Heartbeat sent");
      }
      msg = stream.next() => {
        match msg {
          Some(Ok(Message::Text(text))) => match parse_frame(&text, &topic) {
            Ok(Inbound::Change(change)) => {
              tracing::debug!(channel = %channel.name, table = %change.table, kind = ?change.kind, "Change received");
              if events.send(change).await.is_err() {
                leave(&mut sink, &channel, next_ref).await;
                break;
              }
            }
            Ok(Inbound::Closed) => {
              tracing::warn!(channel = %channel.name, "Channel closed by server");
              break;
            }
            Ok(Inbound::Rejected(reason)) => {
              tracing::warn!(channel = %channel.name, reason = %reason, "Channel error reply");
            }
            Ok(Inbound::Joined | Inbound::Ignored) => {}
            Err(e) => {
              tracing::warn!(channel = %channel.name, error = %e, raw = %text, "Unreadable realtime frame");
            }
          },
          Some(Ok(Message::Close(frame))) => {
            tracing::info!(channel = %channel.name, ?frame, "Realtime socket closed");
            break;
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            tracing::error!(channel = %channel.name, error = %e, "Realtime receive error");
            break;
          }
          None => {
            tracing::info!(channel = %channel.name, "Realtime stream exhausted");
            break;
          }
        }
      }
    }
  }
}

async fn leave(sink: &mut SplitSink<Socket, Message>, channel: &ChannelSpec, msg_ref: u64) {
  if let Ok(text) = PhoenixMessage::leave(channel, msg_ref).to_text() {
    if let Err(e) = sink.send(Message::Text(text)).await {
      tracing::debug!(channel = %channel.name, error = %e, "Failed to send leave");
    }
  }
  if let Err(e) = sink.close().await {
    tracing::debug!(channel = %channel.name, error = %e, "Failed to close realtime socket");
  }
  tracing::info!(channel = %channel.name, "Left realtime channel");
}
