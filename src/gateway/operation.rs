//! Request routing: `(method, endpoint, body)` to a logical operation.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

use super::types::{NewNgo, NewStory, RecordId};

/// A logical gateway operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  ListStories,
  GetStory(RecordId),
  CreateStory(NewStory),
  ListNgos,
  CreateNgo(NewNgo),
  ApproveHelp(RecordId),
}

impl Operation {
  /// Resolve an endpoint call into an operation.
  ///
  /// Unknown method/endpoint pairs are `UnsupportedOperation`; a missing or
  /// malformed body on a create is a validation error on `body`.
  pub fn resolve(method: &str, endpoint: &str, body: Option<Value>) -> Result<Self> {
    let method = method.trim().to_uppercase();
    let path = endpoint.trim().trim_end_matches('/');
    let segments: Vec<&str> = path
      .strip_prefix("/api/")
      .map(|rest| rest.split('/').collect())
      .unwrap_or_default();

    let operation = match (method.as_str(), segments.as_slice()) {
      ("GET", ["stories"]) => Some(Operation::ListStories),
      ("GET", ["stories", id]) if !id.is_empty() => Some(Operation::GetStory(RecordId::from(*id))),
      ("POST", ["stories"]) => Some(Operation::CreateStory(parse_body(body)?)),
      ("GET", ["ngos"]) => Some(Operation::ListNgos),
      ("POST", ["ngos"]) => Some(Operation::CreateNgo(parse_body(body)?)),
      ("PATCH", ["stories", id, "help"]) if !id.is_empty() => {
        Some(Operation::ApproveHelp(RecordId::from(*id)))
      }
      _ => None,
    };

    operation.ok_or_else(|| Error::UnsupportedOperation {
      method,
      endpoint: endpoint.to_string(),
    })
  }
}

fn parse_body<T: DeserializeOwned>(body: Option<Value>) -> Result<T> {
  let body = body.ok_or_else(|| Error::field("body", "Request body is required"))?;
  serde_json::from_value(body).map_err(|e| Error::field("body", format!("Malformed request body: {}", e)))
}
