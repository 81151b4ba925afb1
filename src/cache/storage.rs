//! Cache storage trait and its implementations.
//!
//! All storages are session-scoped: nothing outlives the process.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// One cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
  pub payload: Value,
  pub fetched_at: DateTime<Utc>,
  /// Freshness window this entry was stored with
  pub stale_time: Duration,
  /// Set by invalidation; cleared by the next store
  pub invalidated: bool,
  /// Bumped by every invalidation
  pub generation: u64,
}

impl CachedEntry {
  pub fn new(payload: Value, stale_time: Duration) -> Self {
    Self {
      payload,
      fetched_at: Utc::now(),
      stale_time,
      invalidated: false,
      generation: 0,
    }
  }

  /// Generation the data was fetched under.
  pub fn with_generation(mut self, generation: u64) -> Self {
    self.generation = generation;
    self
  }

  /// Fresh means not invalidated and younger than the window.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    !self.invalidated && now - self.fetched_at < self.stale_time
  }
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<CachedEntry>>;

  /// Store (or overwrite) an entry.
  ///
  /// If the stored entry has a newer generation than `entry`, it was
  /// invalidated after `entry` was fetched: the new payload is kept but
  /// stays invalidated.
  fn put(&self, key: &str, entry: &CachedEntry) -> Result<()>;

  /// Mark one entry stale. Returns whether the key was present.
  fn invalidate(&self, key: &str) -> Result<bool>;

  /// Mark every entry whose key starts with `prefix` stale. Returns the match count.
  fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - every read is a miss.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &str, _entry: &CachedEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn invalidate(&self, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn invalidate_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }
}

/// Plain in-memory map. The default.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CachedEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CachedEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn put(&self, key: &str, entry: &CachedEntry) -> Result<()> {
    let mut entries = self.lock()?;
    let mut entry = entry.clone();
    if let Some(current) = entries.get(key) {
      if current.generation > entry.generation {
        entry.generation = current.generation;
        entry.invalidated = true;
      }
    }
    entries.insert(key.to_string(), entry);
    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<bool> {
    Ok(match self.lock()?.get_mut(key) {
      Some(entry) => {
        entry.invalidated = true;
        entry.generation += 1;
        true
      }
      None => false,
    })
  }

  fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let mut count = 0;
    for (key, entry) in entries.iter_mut() {
      if key.starts_with(prefix) {
        entry.invalidated = true;
        entry.generation += 1;
        count += 1;
      }
    }
    Ok(count)
  }
}

/// SQLite-backed storage on a private in-memory database.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    fetched_at TEXT NOT NULL,
    stale_ms INTEGER NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    generation INTEGER NOT NULL DEFAULT 0
);
"#;

impl SqliteStorage {
  /// Open a fresh in-memory database for this session.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::Storage(format!("Failed to open cache database: {}", e)))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to create cache tables: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, String, i64, bool, i64)> = conn
      .query_row(
        "SELECT payload, fetched_at, stale_ms, invalidated, generation
         FROM query_cache WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()?;

    match row {
      Some((payload, fetched_at, stale_ms, invalidated, generation)) => {
        let payload = serde_json::from_slice(&payload)
          .map_err(|e| Error::Storage(format!("Corrupt cache payload for {}: {}", key, e)))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
          .map_err(|e| Error::Storage(format!("Bad timestamp '{}': {}", fetched_at, e)))?
          .with_timezone(&Utc);

        Ok(Some(CachedEntry {
          payload,
          fetched_at,
          stale_time: Duration::milliseconds(stale_ms),
          invalidated,
          generation: generation as u64,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, entry: &CachedEntry) -> Result<()> {
    let conn = self.lock()?;
    let payload = serde_json::to_vec(&entry.payload)
      .map_err(|e| Error::Storage(format!("Failed to serialize payload: {}", e)))?;

    conn.execute(
      "INSERT INTO query_cache (cache_key, payload, fetched_at, stale_ms, invalidated, generation)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
       ON CONFLICT(cache_key) DO UPDATE SET
         payload = excluded.payload,
         fetched_at = excluded.fetched_at,
         stale_ms = excluded.stale_ms,
         invalidated = CASE WHEN query_cache.generation > excluded.generation
           THEN 1 ELSE excluded.invalidated END,
         generation = MAX(query_cache.generation, excluded.generation)",
      params![
        key,
        payload,
        entry.fetched_at.to_rfc3339(),
        entry.stale_time.num_milliseconds(),
        entry.invalidated,
        entry.generation as i64
      ],
    )?;

    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let changed = conn.execute(
      "UPDATE query_cache SET invalidated = 1, generation = generation + 1 WHERE cache_key = ?",
      params![key],
    )?;
    Ok(changed > 0)
  }

  fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self.lock()?;
    // substr avoids LIKE wildcard escaping in keys
    let changed = conn.execute(
      "UPDATE query_cache SET invalidated = 1, generation = generation + 1
       WHERE substr(cache_key, 1, ?) = ?",
      params![prefix.chars().count() as i64, prefix],
    )?;
    Ok(changed)
  }
}
