//! In-process table backend for tests.
//!
//! Mimics the parts of PostgREST the gateway relies on: server-assigned
//! ids and timestamps, equality filters, ordering, and error payloads.
//! Clones share state so a test can keep a handle while the gateway owns
//! another.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Select, TableBackend, STORIES_TABLE};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
  tables: Mutex<HashMap<String, Vec<Value>>>,
  failures: Mutex<VecDeque<String>>,
  clock: Mutex<Option<DateTime<Utc>>>,
  next_id: AtomicUsize,
  selects: AtomicUsize,
  inserts: AtomicUsize,
  updates: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
  state: Arc<State>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store a row as-is, bypassing call counters.
  pub fn seed(&self, table: &str, row: Value) {
    self
      .state
      .tables
      .lock()
      .unwrap()
      .entry(table.to_string())
      .or_default()
      .push(row);
  }

  /// Make the next call fail with a backend error carrying `message`.
  pub fn fail_next(&self, message: &str) {
    self
      .state
      .failures
      .lock()
      .unwrap()
      .push_back(message.to_string());
  }

  pub fn selects(&self) -> usize {
    self.state.selects.load(Ordering::SeqCst)
  }

  pub fn inserts(&self) -> usize {
    self.state.inserts.load(Ordering::SeqCst)
  }

  pub fn updates(&self) -> usize {
    self.state.updates.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.selects() + self.inserts() + self.updates()
  }

  /// Monotonic fake clock; each call is one second after the previous.
  fn now(&self) -> String {
    let mut clock = self.state.clock.lock().unwrap();
    let next = match *clock {
      Some(t) => t + Duration::seconds(1),
      None => Utc.with_ymd_and_hms(2024, 8, 15, 9, 0, 0).unwrap(),
    };
    *clock = Some(next);
    next.to_rfc3339()
  }

  fn take_failure(&self) -> Result<()> {
    match self.state.failures.lock().unwrap().pop_front() {
      Some(message) => Err(Error::Remote(message)),
      None => Ok(()),
    }
  }
}

fn value_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Story ids are a bigint column; PostgREST rejects anything else.
fn check_filters(table: &str, query: &Select) -> Result<()> {
  if table != STORIES_TABLE {
    return Ok(());
  }
  for (column, value) in &query.filters {
    if column == "id" && value.parse::<i64>().is_err() {
      return Err(Error::InvalidValue(format!(
        "invalid input syntax for type bigint: \"{}\"",
        value
      )));
    }
  }
  Ok(())
}

fn matches(row: &Value, query: &Select) -> bool {
  query.filters.iter().all(|(column, wanted)| {
    row
      .get(column)
      .map(|v| value_text(v) == *wanted)
      .unwrap_or(false)
  })
}

impl TableBackend for MemoryBackend {
  async fn select(&self, table: &str, query: &Select) -> Result<Vec<Value>> {
    self.state.selects.fetch_add(1, Ordering::SeqCst);
    self.take_failure()?;
    check_filters(table, query)?;

    let tables = self.state.tables.lock().unwrap();
    let mut rows: Vec<Value> = tables
      .get(table)
      .map(|rows| rows.iter().filter(|r| matches(r, query)).cloned().collect())
      .unwrap_or_default();

    if let Some(order) = &query.order {
      rows.sort_by_key(|r| r.get(&order.column).map(value_text).unwrap_or_default());
      if !order.ascending {
        rows.reverse();
      }
    }
    if let Some(limit) = query.limit {
      rows.truncate(limit);
    }

    Ok(rows)
  }

  async fn insert(&self, table: &str, row: Value) -> Result<Value> {
    self.state.inserts.fetch_add(1, Ordering::SeqCst);
    self.take_failure()?;

    let mut object: Map<String, Value> = match row {
      Value::Object(map) => map,
      other => return Err(Error::Remote(format!("expected object row, got {}", other))),
    };

    let n = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let id = if table == STORIES_TABLE {
      Value::from(n)
    } else {
      Value::from(format!("{}-{}", table, n))
    };
    object.entry("id").or_insert(id);

    let now = self.now();
    object
      .entry("created_at")
      .or_insert_with(|| Value::from(now.clone()));
    object.entry("updated_at").or_insert_with(|| Value::from(now));

    let stored = Value::Object(object);
    self
      .state
      .tables
      .lock()
      .unwrap()
      .entry(table.to_string())
      .or_default()
      .push(stored.clone());

    Ok(stored)
  }

  async fn update(&self, table: &str, query: &Select, patch: Value) -> Result<Vec<Value>> {
    self.state.updates.fetch_add(1, Ordering::SeqCst);
    self.take_failure()?;
    check_filters(table, query)?;

    let now = self.now();
    let mut tables = self.state.tables.lock().unwrap();
    let mut updated = Vec::new();

    for row in tables.get_mut(table).into_iter().flatten() {
      if !matches(row, query) {
        continue;
      }
      if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &patch) {
        for (k, v) in changes {
          target.insert(k.clone(), v.clone());
        }
        target.insert("updated_at".to_string(), Value::from(now.clone()));
      }
      updated.push(row.clone());
    }

    Ok(updated)
  }
}
