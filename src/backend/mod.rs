//! External table API seam.
//!
//! The gateway talks to storage only through [`TableBackend`]: select,
//! insert and update over raw JSON rows. [`PostgrestBackend`] is the real
//! implementation.

mod postgrest;

#[cfg(test)]
pub mod memory;

use serde_json::Value;
use std::future::Future;

use crate::error::Result;

pub use postgrest::PostgrestBackend;

pub const STORIES_TABLE: &str = "stories";
pub const NGOS_TABLE: &str = "ngos";

/// Sort order for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
  pub column: String,
  pub ascending: bool,
}

/// Row selection: equality filters, optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Select {
  pub filters: Vec<(String, String)>,
  pub order: Option<Order>,
  pub limit: Option<usize>,
}

impl Select {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
    self.filters.push((column.to_string(), value.to_string()));
    self
  }

  pub fn order_desc(mut self, column: &str) -> Self {
    self.order = Some(Order {
      column: column.to_string(),
      ascending: false,
    });
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// A table-oriented data API.
///
/// Each call is a single round trip; implementations do not retry.
pub trait TableBackend: Send + Sync + 'static {
  /// Rows matching `query`, in the requested order.
  fn select(&self, table: &str, query: &Select) -> impl Future<Output = Result<Vec<Value>>> + Send;

  /// Insert one row and return it as stored (with server-assigned fields).
  fn insert(&self, table: &str, row: Value) -> impl Future<Output = Result<Value>> + Send;

  /// Apply `patch` to every row matching `query`; returns the updated rows.
  fn update(
    &self,
    table: &str,
    query: &Select,
    patch: Value,
  ) -> impl Future<Output = Result<Vec<Value>>> + Send;
}
