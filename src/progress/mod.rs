//! Progress module for resumable crawling
//!
//! This module persists what a crawl needs to survive restarts:
//! - Per-category cursors (next page, items processed, status)
//! - An expiring error log used for diagnostics and retry discovery
//! - Stats of the last finished session per category

mod cache;
mod store;
mod types;

pub use cache::{KeyTtl, KeyValueCache, SqliteCache};
pub use store::{ProgressStore, ProgressTtls};
pub use types::{CrawlProgress, ErrorLogEntry, FailedPages, ProgressStatus, SessionStats};

use crate::config::StorageConfig;
use crate::storage::StorageResult;
use std::path::Path;

/// Opens the progress store backed by the configured cache file
pub fn open_progress_store(config: &StorageConfig) -> StorageResult<ProgressStore> {
    let cache = SqliteCache::new(Path::new(&config.cache_path))?;
    Ok(ProgressStore::new(Box::new(cache), ProgressTtls::from(config)))
}
