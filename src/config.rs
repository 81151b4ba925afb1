use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheOptions;
use crate::gateway::cache::{STORIES_PREFIX, STORY_PREFIX};

/// Upper bounds for durations read from the file
const MAX_STALE_SECS: u64 = 24 * 60 * 60;
const MAX_HEARTBEAT_SECS: u64 = 60 * 60;

const URL_VARS: [&str; 2] = ["VIHANG_SUPABASE_URL", "SUPABASE_URL"];
const KEY_VARS: [&str; 2] = ["VIHANG_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub backend: BackendConfig,
  pub cache: CacheConfig,
  pub realtime: RealtimeConfig,
  pub watch: WatchConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  /// Project URL, e.g. https://<ref>.supabase.co
  pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  #[default]
  Memory,
  /// In-memory SQLite database
  Sqlite,
  /// Every read is a miss
  Disabled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_secs: u64,
  pub retry: u32,
  pub retry_delay_ms: u64,
  pub storage: StorageKind,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: 30,
      retry: 1,
      retry_delay_ms: 1000,
      storage: StorageKind::Memory,
    }
  }
}

impl CacheConfig {
  pub fn options(&self) -> CacheOptions {
    CacheOptions {
      stale_time: chrono::Duration::seconds(self.stale_secs.min(MAX_STALE_SECS) as i64),
      retry: self.retry,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
  pub enabled: bool,
  pub channel: String,
  pub heartbeat_secs: u64,
  /// Cache key prefixes marked stale on every change notification
  pub invalidate: Vec<String>,
}

impl RealtimeConfig {
  pub fn heartbeat(&self) -> Duration {
    Duration::from_secs(self.heartbeat_secs.clamp(1, MAX_HEARTBEAT_SECS))
  }
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      channel: "stories-changes".to_string(),
      heartbeat_secs: 30,
      invalidate: vec![STORIES_PREFIX.to_string(), STORY_PREFIX.to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// 0 disables periodic refetching
  pub refetch_interval_secs: u64,
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self {
      refetch_interval_secs: 60,
    }
  }
}

impl WatchConfig {
  pub fn refetch_interval(&self) -> Option<Duration> {
    (self.refetch_interval_secs > 0).then(|| Duration::from_secs(self.refetch_interval_secs))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when VIHANG_LOG is unset
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "warn".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vihang.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vihang/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.apply_env_with(|name| std::env::var(name).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("vihang.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vihang").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Override file settings from environment variables.
  pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = first_set(&lookup, &URL_VARS) {
      self.backend.url = Some(url);
    }
    self
  }

  /// The backend project URL.
  pub fn backend_url(&self) -> Result<Url> {
    let raw = self.backend.url.as_deref().ok_or_else(|| {
      eyre!(
        "Backend URL not configured. Set backend.url in the config file or the {} (or {}) environment variable.",
        URL_VARS[0],
        URL_VARS[1]
      )
    })?;
    Url::parse(raw).map_err(|e| eyre!("Invalid backend URL '{}': {}", raw, e))
  }

  /// Get the anon key from environment variables.
  ///
  /// Checks VIHANG_SUPABASE_ANON_KEY first, then SUPABASE_ANON_KEY.
  pub fn anon_key() -> Result<String> {
    Self::anon_key_with(|name| std::env::var(name).ok())
  }

  fn anon_key_with(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    first_set(&lookup, &KEY_VARS).ok_or_else(|| {
      eyre!(
        "Anon key not found. Set {} or {} environment variable.",
        KEY_VARS[0],
        KEY_VARS[1]
      )
    })
  }
}

fn first_set(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
  names
    .iter()
    .filter_map(|name| lookup(*name))
    .map(|v| v.trim().to_string())
    .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| map.get(name).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.cache.stale_secs, 30);
    assert_eq!(config.cache.retry, 1);
    assert_eq!(config.cache.storage, StorageKind::Memory);
    assert!(config.realtime.enabled);
    assert_eq!(config.realtime.channel, "stories-changes");
    assert_eq!(config.realtime.invalidate, ["stories-list", "story:"]);
    assert_eq!(config.log.level, "warn");
    assert_eq!(config.watch.refetch_interval(), Some(Duration::from_secs(60)));
  }

  #[test]
  fn test_oversized_durations_are_clamped() {
    let config = Config::parse(&format!(
      "cache:\n  stale_secs: {}\nrealtime:\n  heartbeat_secs: {}\n",
      u64::MAX,
      u64::MAX
    ))
    .unwrap();
    assert_eq!(config.cache.options().stale_time, chrono::Duration::days(1));
    assert_eq!(config.realtime.heartbeat(), Duration::from_secs(3600));

    let config = Config::parse("realtime:\n  heartbeat_secs: 0\n").unwrap();
    assert_eq!(config.realtime.heartbeat(), Duration::from_secs(1));
  }

  #[test]
  fn test_partial_file() {
    let config = Config::parse(
      "backend:\n  url: https://abc.supabase.co\ncache:\n  stale_secs: 5\n  storage: sqlite\nwatch:\n  refetch_interval_secs: 0\n",
    )
    .unwrap();

    assert_eq!(config.backend.url.as_deref(), Some("https://abc.supabase.co"));
    assert_eq!(config.cache.stale_secs, 5);
    assert_eq!(config.cache.retry, 1);
    assert_eq!(config.cache.storage, StorageKind::Sqlite);
    assert_eq!(config.watch.refetch_interval(), None);
    assert_eq!(config.cache.options().stale_time, chrono::Duration::seconds(5));
  }

  #[test]
  fn test_unknown_storage_rejected() {
    assert!(Config::parse("cache:\n  storage: redis\n").is_err());
  }

  #[test]
  fn test_env_overrides_url() {
    let config = Config::default().apply_env_with(env(&[
      ("SUPABASE_URL", "https://fallback.supabase.co"),
      ("VIHANG_SUPABASE_URL", "https://primary.supabase.co"),
    ]));
    assert_eq!(
      config.backend_url().unwrap().as_str(),
      "https://primary.supabase.co/"
    );
  }

  #[test]
  fn test_missing_url_names_variables() {
    let err = Config::default().backend_url().unwrap_err().to_string();
    assert!(err.contains("VIHANG_SUPABASE_URL"));
    assert!(err.contains("SUPABASE_URL"));
  }

  #[test]
  fn test_anon_key_fallback() {
    assert_eq!(
      Config::anon_key_with(env(&[("SUPABASE_ANON_KEY", "anon")])).unwrap(),
      "anon"
    );
    let err = Config::anon_key_with(env(&[("VIHANG_SUPABASE_ANON_KEY", "  ")]))
      .unwrap_err()
      .to_string();
    assert!(err.contains("SUPABASE_ANON_KEY"));
  }
}
