//! Tracing subscriber setup.
//!
//! Logs go to stderr, or to `log.file` through a non-blocking writer. The
//! filter comes from `VIHANG_LOG` when set, else from `log.level`.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LogConfig;

pub const LOG_ENV: &str = "VIHANG_LOG";

/// Keeps the file writer flushing; hold it until the process exits.
pub struct LogGuard {
  _guard: Option<WorkerGuard>,
}

pub fn init(config: &LogConfig) -> Result<LogGuard> {
  let directive = filter_directive(std::env::var(LOG_ENV).ok(), &config.level);
  let filter = EnvFilter::try_new(&directive)
    .map_err(|e| eyre!("Invalid log filter '{}': {}", directive, e))?;

  match &config.file {
    Some(path) => {
      let (dir, name) = split_log_path(path)?;
      let appender = tracing_appender::rolling::never(dir, name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .try_init()
        .map_err(|e| eyre!("Failed to set logger: {}", e))?;

      Ok(LogGuard {
        _guard: Some(guard),
      })
    }
    None => {
      Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| eyre!("Failed to set logger: {}", e))?;

      Ok(LogGuard { _guard: None })
    }
  }
}

/// `VIHANG_LOG` wins when set and non-blank.
fn filter_directive(from_env: Option<String>, configured: &str) -> String {
  from_env
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
    .unwrap_or_else(|| configured.to_string())
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
  let name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
  let dir = match path.parent() {
    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
    _ => PathBuf::from("."),
  };
  Ok((dir, name.to_string()))
}
