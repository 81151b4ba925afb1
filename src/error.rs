//! Error taxonomy for the data layer.
//!
//! Every failure is scoped to the single operation that produced it. The
//! binary wraps these in `color_eyre::Report` at the command boundary.

use std::collections::BTreeMap;
use std::fmt;

/// Field-level validation failures, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a message against a field.
  pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.0.entry(field.into()).or_default().push(message.into());
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn contains(&self, field: &str) -> bool {
    self.0.contains_key(field)
  }

  /// Messages recorded for a single field.
  pub fn messages(&self, field: &str) -> &[String] {
    self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }

  /// Turn the collected messages into a result.
  pub fn into_result(self) -> Result<()> {
    if self.is_empty() {
      Ok(())
    } else {
      Err(Error::Validation(self))
    }
  }
}

impl fmt::Display for FieldErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (field, messages) in &self.0 {
      for message in messages {
        if !first {
          f.write_str("; ")?;
        }
        write!(f, "{}: {}", field, message)?;
        first = false;
      }
    }
    Ok(())
  }
}

impl From<validator::ValidationErrors> for FieldErrors {
  fn from(errors: validator::ValidationErrors) -> Self {
    let mut out = FieldErrors::new();
    for (field, errs) in errors.field_errors() {
      for err in errs.iter() {
        let message = err
          .message
          .as_ref()
          .map(|m| m.to_string())
          .unwrap_or_else(|| format!("invalid value ({})", err.code));
        out.add(field.to_string(), message);
      }
    }
    out
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
  /// Raised before any network call.
  #[error("validation failed: {0}")]
  Validation(FieldErrors),

  /// The external call failed or returned an error payload.
  #[error("{0}")]
  Remote(String),

  #[error("unsupported operation: {method} {endpoint}")]
  UnsupportedOperation { method: String, endpoint: String },

  /// The backend could not read a filter value as its column's type.
  #[error("invalid value: {0}")]
  InvalidValue(String),

  #[error("{resource} not found: {id}")]
  NotFound { resource: &'static str, id: String },

  #[error("cache storage error: {0}")]
  Storage(String),

  #[error("realtime channel error: {0}")]
  Realtime(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Whether a failed fetch is worth one more attempt.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Error::Remote(_) | Error::Storage(_) | Error::Realtime(_)
    )
  }

  pub fn field(field: &str, message: impl Into<String>) -> Self {
    let mut errors = FieldErrors::new();
    errors.add(field, message);
    Error::Validation(errors)
  }
}

impl From<validator::ValidationErrors> for Error {
  fn from(errors: validator::ValidationErrors) -> Self {
    Error::Validation(errors.into())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Remote(format!("request failed: {}", e))
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Error::Remote(format!("malformed record: {}", e))
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::Storage(e.to_string())
  }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
  fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
    Error::Realtime(e.to_string())
  }
}
