//! Values persisted by the progress store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a category's crawl cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// No crawl has been recorded for the category
    New,
    Running,
    Completed,
    /// The last session failed, or the cache could not be read
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resumable crawl cursor for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub category: String,
    /// Next listing page to fetch, starting at 1
    pub current_page: u32,
    /// Listing items seen across all pages so far
    pub total_processed: u64,
    pub status: ProgressStatus,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<SessionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CrawlProgress {
    /// Cursor for a category that has never been crawled
    pub fn fresh(category: &str) -> Self {
        Self::at_start(category, ProgressStatus::New)
    }

    /// Cursor returned when the cache cannot be read
    pub fn unavailable(category: &str) -> Self {
        Self::at_start(category, ProgressStatus::Error)
    }

    fn at_start(category: &str, status: ProgressStatus) -> Self {
        Self {
            category: category.to_string(),
            current_page: 1,
            total_processed: 0,
            status,
            last_updated_at: Utc::now(),
            final_stats: None,
            last_error: None,
        }
    }

    /// Page a new session should start from
    ///
    /// New and completed categories start over from the first page.
    pub fn resume_page(&self) -> u32 {
        match self.status {
            ProgressStatus::New | ProgressStatus::Completed => 1,
            ProgressStatus::Running | ProgressStatus::Error => self.current_page.max(1),
        }
    }
}

/// One diagnostic entry in the append-only error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub category: String,
    /// Listing page, when the failure happened during enumeration
    pub page: Option<u32>,
    /// Item slug, when the failure happened while fetching details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Failed pages of a category together with their log entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailedPages {
    /// Distinct failed listing pages, ascending
    pub pages: Vec<u32>,
    /// All logged entries, oldest first
    pub errors: Vec<ErrorLogEntry>,
}

/// Counters and metadata of one finished session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub category: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages: u64,
    pub new_items: u64,
    pub updated_items: u64,
    pub skipped_duplicates: u64,
    pub duplicate_writes: u64,
    pub sub_records: u64,
    pub errors: u64,
    /// completed, stopped, paused or error
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_page() {
        let mut progress = CrawlProgress::fresh("ongoing");
        progress.current_page = 7;
        assert_eq!(progress.resume_page(), 1);

        progress.status = ProgressStatus::Running;
        assert_eq!(progress.resume_page(), 7);

        progress.status = ProgressStatus::Error;
        assert_eq!(progress.resume_page(), 7);

        progress.status = ProgressStatus::Completed;
        assert_eq!(progress.resume_page(), 1);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProgressStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
