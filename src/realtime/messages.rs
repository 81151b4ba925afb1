//! Phoenix channel frames used by the realtime socket.
//!
//! Every frame is `{"topic", "event", "payload", "ref"}`. Database changes
//! arrive as `postgres_changes` events whose `payload.data` carries the
//! change type, table and row.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::ChannelSpec;

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const HEARTBEAT_EVENT: &str = "heartbeat";
pub const JOIN_EVENT: &str = "phx_join";
pub const LEAVE_EVENT: &str = "phx_leave";
pub const REPLY_EVENT: &str = "phx_reply";
pub const ERROR_EVENT: &str = "phx_error";
pub const CLOSE_EVENT: &str = "phx_close";
pub const CHANGES_EVENT: &str = "postgres_changes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
  pub topic: String,
  pub event: String,
  #[serde(default)]
  pub payload: Value,
  #[serde(rename = "ref", default)]
  pub msg_ref: Option<String>,
}

impl PhoenixMessage {
  /// Join frame subscribing to every change on the channel's table.
  pub fn join(channel: &ChannelSpec, access_token: &str, msg_ref: u64) -> Self {
    Self {
      topic: channel.topic(),
      event: JOIN_EVENT.to_string(),
      payload: json!({
        "config": {
          "broadcast": { "ack": false, "self": false },
          "presence": { "key": "" },
          "postgres_changes": [
            { "event": "*", "schema": channel.schema, "table": channel.table }
          ],
          "private": false
        },
        "access_token": access_token
      }),
      msg_ref: Some(msg_ref.to_string()),
    }
  }

  pub fn heartbeat(msg_ref: u64) -> Self {
    Self {
      topic: PHOENIX_TOPIC.to_string(),
      event: HEARTBEAT_EVENT.to_string(),
      payload: json!({}),
      msg_ref: Some(msg_ref.to_string()),
    }
  }

  pub fn leave(channel: &ChannelSpec, msg_ref: u64) -> Self {
    Self {
      topic: channel.topic(),
      event: LEAVE_EVENT.to_string(),
      payload: json!({}),
      msg_ref: Some(msg_ref.to_string()),
    }
  }

  pub fn to_text(&self) -> Result<String> {
    Ok(serde_json::to_string(self)?)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// One row-level change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
  pub kind: ChangeKind,
  pub table: String,
  pub record: Option<Value>,
}

#[derive(Deserialize)]
struct ChangePayload {
  data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
  #[serde(rename = "type")]
  kind: ChangeKind,
  table: String,
  #[serde(default)]
  record: Option<Value>,
}

/// What an inbound frame means for the subscription on `topic`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
  Change(ChangeEvent),
  Joined,
  Rejected(String),
  Closed,
  /// Heartbeat replies, presence, other topics
  Ignored,
}

/// Classify a text frame received on the socket.
pub fn parse_frame(text: &str, topic: &str) -> Result<Inbound> {
  let message: PhoenixMessage = serde_json::from_str(text)
    .map_err(|e| Error::Realtime(format!("malformed frame: {}", e)))?;

  if message.topic != topic {
    return Ok(Inbound::Ignored);
  }

  match message.event.as_str() {
    CHANGES_EVENT => {
      let payload: ChangePayload = serde_json::from_value(message.payload)
        .map_err(|e| Error::Realtime(format!("malformed change payload: {}", e)))?;
      Ok(Inbound::Change(ChangeEvent {
        kind: payload.data.kind,
        table: payload.data.table,
        record: payload.data.record,
      }))
    }
    REPLY_EVENT => {
      let status = message.payload.get("status").and_then(Value::as_str);
      match status {
        Some("ok") => Ok(Inbound::Joined),
        _ => {
          let reason = message
            .payload
            .pointer("/response/reason")
            .and_then(Value::as_str)
            .unwrap_or("join rejected")
            .to_string();
          Ok(Inbound::Rejected(reason))
        }
      }
    }
    ERROR_EVENT | CLOSE_EVENT => Ok(Inbound::Closed),
    _ => Ok(Inbound::Ignored),
  }
}
