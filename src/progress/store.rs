//! Resumable crawl progress on top of a key-value cache
//!
//! Every category owns three namespaces:
//! - `harvest:progress:{category}`: the crawl cursor, overwritten after every page
//! - `harvest:errors:{category}:{millis}-{seq}`: append-only error log
//! - `harvest:stats:{category}`: stats of the last finished session
//!
//! Writes never fail the crawl. A cache outage is logged and the crawl keeps
//! going; reads of the cursor degrade to page 1 with an error status.

use crate::config::StorageConfig;
use crate::progress::cache::{KeyTtl, KeyValueCache};
use crate::progress::types::{
    CrawlProgress, ErrorLogEntry, FailedPages, ProgressStatus, SessionStats,
};
use crate::storage::StorageResult;
use crate::CrawlError;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const PROGRESS_PREFIX: &str = "harvest:progress:";
const ERRORS_PREFIX: &str = "harvest:errors:";
const STATS_PREFIX: &str = "harvest:stats:";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Expiry applied to each namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTtls {
    pub progress: Duration,
    pub errors: Duration,
    pub stats: Duration,
}

impl Default for ProgressTtls {
    fn default() -> Self {
        Self {
            progress: DAY * 7,
            errors: DAY * 3,
            stats: DAY * 30,
        }
    }
}

impl From<&StorageConfig> for ProgressTtls {
    fn from(config: &StorageConfig) -> Self {
        Self {
            progress: DAY * config.progress_ttl_days,
            errors: DAY * config.error_ttl_days,
            stats: DAY * config.stats_ttl_days,
        }
    }
}

/// Per-category crawl cursors, error logs and session stats
pub struct ProgressStore {
    cache: Box<dyn KeyValueCache>,
    ttls: ProgressTtls,
    error_seq: AtomicU64,
}

fn progress_key(category: &str) -> String {
    format!("{}{}", PROGRESS_PREFIX, category)
}

fn errors_prefix(category: &str) -> String {
    format!("{}{}:", ERRORS_PREFIX, category)
}

fn stats_key(category: &str) -> String {
    format!("{}{}", STATS_PREFIX, category)
}

impl ProgressStore {
    /// Creates a progress store over the given cache
    pub fn new(cache: Box<dyn KeyValueCache>, ttls: ProgressTtls) -> Self {
        Self {
            cache,
            ttls,
            error_seq: AtomicU64::new(0),
        }
    }

    /// Persists the cursor of a running crawl
    ///
    /// # Arguments
    ///
    /// * `category` - The category being crawled
    /// * `page` - Next page to fetch
    /// * `total_processed` - Listing items seen so far
    pub fn save_progress(&self, category: &str, page: u32, total_processed: u64) {
        let progress = CrawlProgress {
            category: category.to_string(),
            current_page: page.max(1),
            total_processed,
            status: ProgressStatus::Running,
            last_updated_at: Utc::now(),
            final_stats: None,
            last_error: None,
        };
        self.write_progress(&progress);
    }

    /// Loads the cursor for a category
    ///
    /// Returns a fresh cursor if none is stored, and a page-1 cursor with an
    /// error status if the cache cannot be read.
    pub fn get_progress(&self, category: &str) -> CrawlProgress {
        let raw = match self.cache.get(&progress_key(category)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to read progress for '{}': {}", category, e);
                return CrawlProgress::unavailable(category);
            }
        };

        match raw {
            None => CrawlProgress::fresh(category),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(progress) => progress,
                Err(e) => {
                    tracing::warn!("Corrupt progress entry for '{}': {}", category, e);
                    CrawlProgress::unavailable(category)
                }
            },
        }
    }

    /// Marks a category as running without moving its cursor
    pub fn mark_running(&self, category: &str) {
        let mut progress = self.get_progress(category);
        progress.status = ProgressStatus::Running;
        progress.last_error = None;
        progress.last_updated_at = Utc::now();
        self.write_progress(&progress);
    }

    /// Marks a category as completed and attaches the session's stats
    pub fn mark_completed(&self, category: &str, final_stats: SessionStats) {
        let mut progress = self.get_progress(category);
        progress.status = ProgressStatus::Completed;
        progress.final_stats = Some(final_stats);
        progress.last_error = None;
        progress.last_updated_at = Utc::now();
        self.write_progress(&progress);
    }

    /// Marks a category as failed, keeping its cursor for the next attempt
    pub fn mark_error(&self, category: &str, message: &str) {
        let mut progress = self.get_progress(category);
        progress.status = ProgressStatus::Error;
        progress.last_error = Some(message.to_string());
        progress.last_updated_at = Utc::now();
        self.write_progress(&progress);
    }

    /// Appends a listing page failure to the error log
    pub fn log_error(&self, category: &str, page: u32, error: &CrawlError) {
        self.append_error(ErrorLogEntry {
            category: category.to_string(),
            page: Some(page),
            item: None,
            error_type: error.error_type().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Appends a detail or sub-record failure to the error log
    pub fn log_item_error(&self, category: &str, item: &str, error: &CrawlError) {
        self.append_error(ErrorLogEntry {
            category: category.to_string(),
            page: None,
            item: Some(item.to_string()),
            error_type: error.error_type().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Collects the logged failures of a category
    ///
    /// Expired entries are not returned.
    pub fn get_failed_pages(&self, category: &str) -> StorageResult<FailedPages> {
        let mut errors = Vec::new();
        for key in self.cache.keys(&errors_prefix(category))? {
            let Some(raw) = self.cache.get(&key)? else {
                continue;
            };
            match serde_json::from_str::<ErrorLogEntry>(&raw) {
                Ok(entry) => errors.push(entry),
                Err(e) => tracing::debug!("Skipping unreadable error entry {}: {}", key, e),
            }
        }

        errors.sort_by_key(|entry| entry.timestamp);
        let pages: BTreeSet<u32> = errors.iter().filter_map(|entry| entry.page).collect();

        Ok(FailedPages {
            pages: pages.into_iter().collect(),
            errors,
        })
    }

    /// Forgets the cursor and error log of a category
    ///
    /// Session stats are kept for reporting.
    pub fn reset_progress(&self, category: &str) -> StorageResult<()> {
        self.cache.delete(&progress_key(category))?;
        for key in self.cache.keys(&errors_prefix(category))? {
            self.cache.delete(&key)?;
        }
        tracing::info!("Reset progress for '{}'", category);
        Ok(())
    }

    /// Removes entries older than the retention window
    ///
    /// An entry's age is derived from its namespace TTL and its remaining
    /// lifetime. Entries without any expiry are removed unconditionally.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of removed entries
    /// * `Err(StorageError)` - The cache could not be scanned
    pub fn cleanup(&self, retention_days: u32) -> StorageResult<usize> {
        let retention = DAY * retention_days;
        let namespaces = [
            (PROGRESS_PREFIX, self.ttls.progress),
            (ERRORS_PREFIX, self.ttls.errors),
            (STATS_PREFIX, self.ttls.stats),
        ];

        let mut removed = 0;
        for (prefix, ttl) in namespaces {
            for key in self.cache.keys(prefix)? {
                let expired = match self.cache.ttl(&key)? {
                    KeyTtl::Missing => false,
                    KeyTtl::Persistent => true,
                    KeyTtl::Expires(remaining) => ttl.saturating_sub(remaining) > retention,
                };
                if expired && self.cache.delete(&key)? {
                    removed += 1;
                }
            }
        }

        tracing::info!("Progress cleanup removed {} entries", removed);
        Ok(removed)
    }

    /// Stores the stats of a finished session
    pub fn save_session_stats(&self, stats: &SessionStats) {
        match serde_json::to_string(stats) {
            Ok(json) => {
                if let Err(e) =
                    self.cache
                        .set_with_ttl(&stats_key(&stats.category), &json, self.ttls.stats)
                {
                    tracing::warn!("Failed to save session stats for '{}': {}", stats.category, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode session stats: {}", e),
        }
    }

    /// Loads the stats of the last finished session
    pub fn get_session_stats(&self, category: &str) -> StorageResult<Option<SessionStats>> {
        match self.cache.get(&stats_key(category))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Lists every stored cursor, ordered by category
    pub fn list_progress(&self) -> StorageResult<Vec<CrawlProgress>> {
        let mut all = Vec::new();
        for key in self.cache.keys(PROGRESS_PREFIX)? {
            if let Some(raw) = self.cache.get(&key)? {
                all.push(serde_json::from_str(&raw)?);
            }
        }
        Ok(all)
    }

    fn write_progress(&self, progress: &CrawlProgress) {
        let json = match serde_json::to_string(progress) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode progress for '{}': {}", progress.category, e);
                return;
            }
        };

        if let Err(e) =
            self.cache
                .set_with_ttl(&progress_key(&progress.category), &json, self.ttls.progress)
        {
            tracing::warn!("Failed to save progress for '{}': {}", progress.category, e);
        }
    }

    fn append_error(&self, entry: ErrorLogEntry) {
        let seq = self.error_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}{}-{:06}",
            errors_prefix(&entry.category),
            entry.timestamp.timestamp_millis(),
            seq
        );

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode error entry: {}", e);
                return;
            }
        };

        if let Err(e) = self.cache.set_with_ttl(&key, &json, self.ttls.errors) {
            tracing::warn!("Failed to log error for '{}': {}", entry.category, e);
        }
    }
}
