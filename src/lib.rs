//! Catalog Harvester: an adaptive catalog crawling engine
//!
//! This crate crawls a paginated third-party catalog API one category at a time,
//! deduplicating against already-stored records, pacing itself with a statistical
//! rate-limit detector, and persisting resumable progress. A supervisor runs one
//! isolated worker per category and restarts failed workers with backoff.

pub mod config;
pub mod crawler;
pub mod output;
pub mod progress;
pub mod rate;
pub mod state;
pub mod storage;
pub mod supervisor;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Catalog Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl of '{category}' escalated: {reason}")]
    Escalated { category: String, reason: String },

    #[error("Invalid worker transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::WorkerState,
        to: state::WorkerState,
    },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors produced while talking to the source API or handling its payloads
///
/// Transient variants are retried inside the pipeline and never surface past it.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Rate limited by {url} (HTTP {status})")]
    RateLimited {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection error for {url}: {message}")]
    ConnectionError { url: String, message: String },

    #[error("Service unavailable at {url} (HTTP {status})")]
    ServiceUnavailable { url: String, status: u16 },

    #[error("Invalid payload from {context}: {message}")]
    Validation { context: String, message: String },

    #[error("Duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("Unexpected failure for {url}: {message}")]
    Unknown { url: String, message: String },
}

impl CrawlError {
    /// Classifies a transport-level reqwest error
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if error.is_connect() || error.is_request() {
            Self::ConnectionError {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else if let Some(status) = error.status() {
            Self::from_status(url, status.as_u16(), None)
        } else {
            Self::Unknown {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Maps a non-success HTTP status to an error
    pub fn from_status(url: &str, status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 | 509 => Self::RateLimited {
                url: url.to_string(),
                status,
                retry_after,
            },
            502..=504 => Self::ServiceUnavailable {
                url: url.to_string(),
                status,
            },
            _ => Self::Unknown {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            },
        }
    }

    /// Short machine-readable label used in error logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMIT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ConnectionError { .. } => "CONNECTION_ERROR",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::DuplicateKey { .. } => "DUPLICATE_KEY",
            Self::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Returns true for errors worth retrying against the same endpoint
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::ConnectionError { .. }
                | Self::ServiceUnavailable { .. }
                | Self::Unknown { .. }
        )
    }
}

/// Result type alias for Catalog Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlPipeline, SessionOutcome};
pub use progress::{CrawlProgress, ProgressStatus, ProgressStore};
pub use rate::{RateAdaptiveController, RecommendedAction, ResponseAnalysis};
pub use state::WorkerState;
pub use supervisor::{Crawler, WorkerSupervisor};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            CrawlError::from_status("u", 429, None),
            CrawlError::RateLimited { status: 429, .. }
        ));
        assert!(matches!(
            CrawlError::from_status("u", 503, None),
            CrawlError::ServiceUnavailable { status: 503, .. }
        ));
        assert!(matches!(
            CrawlError::from_status("u", 500, None),
            CrawlError::Unknown { .. }
        ));
    }

    #[test]
    fn test_error_type_labels() {
        let err = CrawlError::Timeout {
            url: "https://api.example.com".to_string(),
        };
        assert_eq!(err.error_type(), "TIMEOUT");
        assert!(err.is_transient());

        let err = CrawlError::Validation {
            context: "item".to_string(),
            message: "missing slug".to_string(),
        };
        assert_eq!(err.error_type(), "VALIDATION_ERROR");
        assert!(!err.is_transient());
    }
}
