//! Types describing one observed exchange with the source API

use crate::CrawlError;
use reqwest::header::HeaderMap;
use std::fmt;
use std::time::Duration;

/// Dominant classification of one HTTP exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Success,
    Slow,
    VerySlow,
    Empty,
    Error,
    RateLimited,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Slow => "slow",
            Self::VerySlow => "very_slow",
            Self::Empty => "empty",
            Self::Error => "error",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// What the caller should do before its next request
///
/// Variants are ordered by severity so `max` picks the more cautious action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecommendedAction {
    Continue,
    ReduceSpeed,
    SlowDown,
    CheckApiHealth,
    Wait,
    Backoff,
    PauseAndRetry,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::ReduceSpeed => "reduce_speed",
            Self::SlowDown => "slow_down",
            Self::CheckApiHealth => "check_api_health",
            Self::Wait => "wait",
            Self::Backoff => "backoff",
            Self::PauseAndRetry => "pause_and_retry",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport failure classes recognised by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    ConnectionError,
    ServiceUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Classifies a crawl error
    ///
    /// Payload-level errors (validation, duplicate keys) are not transport
    /// failures and fall into `Unknown` if they ever reach the controller.
    pub fn classify(error: &CrawlError) -> Self {
        match error {
            CrawlError::RateLimited { .. } => Self::RateLimit,
            CrawlError::Timeout { .. } => Self::Timeout,
            CrawlError::ConnectionError { .. } => Self::ConnectionError,
            CrawlError::ServiceUnavailable { .. } => Self::ServiceUnavailable,
            CrawlError::Validation { .. }
            | CrawlError::DuplicateKey { .. }
            | CrawlError::Unknown { .. } => Self::Unknown,
        }
    }

    /// Default action and confidence for this kind of failure
    pub fn response(&self) -> (RecommendedAction, f64) {
        match self {
            Self::RateLimit => (RecommendedAction::Backoff, 0.9),
            Self::Timeout => (RecommendedAction::SlowDown, 0.7),
            Self::ConnectionError => (RecommendedAction::Backoff, 0.6),
            Self::ServiceUnavailable => (RecommendedAction::Backoff, 0.8),
            Self::Unknown => (RecommendedAction::ReduceSpeed, 0.3),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Quota information advertised by the server through headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Server-supplied wait before the next request
    pub retry_after: Option<Duration>,

    /// Requests left in the current window
    pub remaining: Option<u64>,

    /// Size of the current window
    pub limit: Option<u64>,

    /// Time until the window resets
    pub reset_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Returns true if any rate-limit header was recognised
    pub fn is_present(&self) -> bool {
        self.retry_after.is_some()
            || self.remaining.is_some()
            || self.limit.is_some()
            || self.reset_after.is_some()
    }

    /// Returns true when the remaining quota is nearly exhausted
    ///
    /// Low means at most 10% of the advertised limit, or at most 5 requests
    /// when no limit is advertised.
    pub fn is_quota_low(&self) -> bool {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => remaining * 10 <= limit,
            (Some(remaining), _) => remaining <= 5,
            _ => false,
        }
    }
}

/// Immutable verdict for one HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseAnalysis {
    pub status: ResponseStatus,
    pub rate_limit_detected: bool,
    /// Confidence (0..1) that the upstream is throttling us
    pub confidence: f64,
    pub recommended_action: RecommendedAction,
    pub rate_limit_info: Option<RateLimitInfo>,
    pub error_kind: Option<ErrorKind>,
}

impl ResponseAnalysis {
    /// Returns true if the caller can use the payload
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            ResponseStatus::Success | ResponseStatus::Slow | ResponseStatus::VerySlow
        )
    }
}

/// A completed HTTP exchange as seen by the controller
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ResponseSnapshot {
    pub fn new(url: impl Into<String>, status: u16, headers: HeaderMap, body: String) -> Self {
        Self {
            url: url.into(),
            status,
            headers,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts a non-success status into the matching crawl error
    pub fn error_for_status(&self) -> Option<CrawlError> {
        if self.is_success() {
            return None;
        }
        let retry_after = super::headers::parse_rate_limit_info(&self.headers).retry_after;
        Some(CrawlError::from_status(&self.url, self.status, retry_after))
    }
}
