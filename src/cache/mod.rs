//! Client-side query cache.
//!
//! This module provides a resource-agnostic caching mechanism that:
//! - Keys query results by a logical resource path plus filter parameters
//! - Serves fresh results without a network call (30 second window by default)
//! - Serves stale results immediately while refreshing in the background
//! - Refetches invalidated entries before returning, keeping the old value on failure
//! - Retries a failed fetch once before surfacing the error

mod layer;
mod storage;
mod traits;

pub use layer::{CacheOptions, QueryCache};
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, QueryKey};
