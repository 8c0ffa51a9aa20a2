//! Adaptive pacing based on observed request outcomes
//!
//! The controller keeps a short history of request timings and failures and
//! turns every observation into a [`ResponseAnalysis`]. The most recent
//! recommended action, together with error and empty-page streaks, drives the
//! delay the pipeline waits before its next request.

use crate::config::RateConfig;
use crate::rate::analysis::{
    ErrorKind, RecommendedAction, ResponseAnalysis, ResponseSnapshot, ResponseStatus,
};
use crate::rate::headers::{contains_throttle_phrase, is_structurally_empty, parse_rate_limit_info};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Lower bound for any recommended delay
pub const MIN_DELAY: Duration = Duration::from_millis(500);

/// HTTP statuses treated as throttling
const RATE_LIMIT_STATUSES: [u16; 5] = [429, 502, 503, 504, 509];

/// Empty pages in a row before the API is considered unhealthy
const EMPTY_PAGE_ALERT: u32 = 3;

/// Errors in a row before the pipeline should pause
const ERROR_STORM: u32 = 5;

const HISTORY_CAPACITY: usize = 100;
const AVERAGE_WINDOW: usize = 20;
const HEALTH_WINDOW: Duration = Duration::from_secs(5 * 60);
const SLOW_AVERAGE_MS: f64 = 3_000.0;
const UNHEALTHY_AVERAGE_MS: f64 = 10_000.0;
const UNHEALTHY_ERROR_RATE: f64 = 0.3;
const UNHEALTHY_ERROR_STREAK: u32 = 3;

/// Mutable pacing state for one worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateState {
    /// Delay most recently handed out by `current_delay`
    pub current_delay_ms: u64,
    pub consecutive_errors: u32,
    pub consecutive_empty_pages: u32,
    /// Mean response time over the last 20 observations
    pub avg_response_time_ms: f64,
    pub is_rate_limited: bool,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    at: Instant,
    elapsed: Duration,
    failed: bool,
}

/// Statistical rate-limit detector and delay calculator
#[derive(Debug)]
pub struct RateAdaptiveController {
    config: RateConfig,
    state: RateState,
    last_action: RecommendedAction,
    server_retry_after: Option<Duration>,
    history: VecDeque<Observation>,
}

impl RateAdaptiveController {
    /// Creates a controller with the given thresholds
    pub fn new(config: RateConfig) -> Self {
        let mut controller = Self {
            config,
            state: RateState::default(),
            last_action: RecommendedAction::Continue,
            server_retry_after: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        };
        controller.state.current_delay_ms = controller.compute_delay(1.0).as_millis() as u64;
        controller
    }

    /// Current pacing state
    pub fn state(&self) -> &RateState {
        &self.state
    }

    /// Action recommended by the most recent observation
    pub fn last_action(&self) -> RecommendedAction {
        self.last_action
    }

    /// Analyzes a completed HTTP exchange
    ///
    /// Classification is decided by the first matching rule (throttling
    /// status, very slow, slow, empty body); header and body signals can then
    /// only make the recommended action more cautious.
    pub fn analyze_response(
        &mut self,
        response: &ResponseSnapshot,
        elapsed: Duration,
    ) -> ResponseAnalysis {
        let throttled_status = RATE_LIMIT_STATUSES.contains(&response.status);
        let failed = !response.is_success();
        self.record(elapsed, failed);

        let info = parse_rate_limit_info(&response.headers);
        let empty = !failed && is_structurally_empty(&response.body);

        let mut rate_limit_detected = false;
        let mut confidence: f64;
        let mut error_kind = None;
        let status;
        let mut action;

        if throttled_status {
            self.state.consecutive_errors += 1;
            self.state.is_rate_limited = true;
            status = ResponseStatus::RateLimited;
            confidence = 0.95;
            action = RecommendedAction::Backoff;
            rate_limit_detected = true;
            error_kind = Some(if response.status == 429 || response.status == 509 {
                ErrorKind::RateLimit
            } else {
                ErrorKind::ServiceUnavailable
            });
        } else if failed {
            self.state.consecutive_errors += 1;
            status = ResponseStatus::Error;
            confidence = 0.2;
            action = RecommendedAction::ReduceSpeed;
            error_kind = Some(ErrorKind::Unknown);
        } else {
            if empty {
                self.state.consecutive_empty_pages += 1;
            } else {
                self.state.consecutive_empty_pages = 0;
                self.state.consecutive_errors = 0;
                self.state.is_rate_limited = false;
                self.state.last_success_at = Some(Utc::now());
            }

            let elapsed_ms = elapsed.as_millis() as u64;
            if elapsed_ms > self.config.very_slow_threshold {
                status = ResponseStatus::VerySlow;
                confidence = 0.8;
                action = RecommendedAction::SlowDown;
            } else if elapsed_ms > self.config.slow_threshold {
                status = ResponseStatus::Slow;
                confidence = 0.5;
                action = RecommendedAction::ReduceSpeed;
            } else if empty {
                status = ResponseStatus::Empty;
                confidence = 0.3;
                action = RecommendedAction::Continue;
            } else {
                status = ResponseStatus::Success;
                confidence = 0.0;
                action = RecommendedAction::Continue;
            }

            if empty && self.state.consecutive_empty_pages >= EMPTY_PAGE_ALERT {
                action = action.max(RecommendedAction::CheckApiHealth);
            }
        }

        self.server_retry_after = None;
        if let Some(retry_after) = info.retry_after {
            // An explicit server instruction replaces the generic backoff
            action = RecommendedAction::Wait;
            self.server_retry_after = Some(retry_after);
            rate_limit_detected = true;
            confidence = confidence.max(0.9);
        } else if info.is_quota_low() {
            action = action.max(RecommendedAction::Backoff);
            rate_limit_detected = true;
            confidence = confidence.max(0.7);
        }

        // Catalog text can legitimately say "try again later"; only bodies
        // without usable content are scanned.
        if (failed || empty) && contains_throttle_phrase(&response.body) {
            if action != RecommendedAction::Wait {
                action = action.max(RecommendedAction::Backoff);
            }
            rate_limit_detected = true;
            confidence = confidence.max(0.85);
        }

        if self.state.consecutive_errors >= ERROR_STORM {
            action = RecommendedAction::PauseAndRetry;
        }

        self.finish(ResponseAnalysis {
            status,
            rate_limit_detected,
            confidence,
            recommended_action: action,
            rate_limit_info: info.is_present().then_some(info),
            error_kind,
        })
    }

    /// Analyzes a transport-level failure
    pub fn analyze_error(&mut self, error: &CrawlError, elapsed: Duration) -> ResponseAnalysis {
        self.record(elapsed, true);
        self.state.consecutive_errors += 1;

        let kind = ErrorKind::classify(error);
        let (mut action, confidence) = kind.response();

        self.server_retry_after = None;
        if let CrawlError::RateLimited {
            retry_after: Some(retry_after),
            ..
        } = error
        {
            action = RecommendedAction::Wait;
            self.server_retry_after = Some(*retry_after);
        }

        if kind == ErrorKind::RateLimit {
            self.state.is_rate_limited = true;
        }

        if self.state.consecutive_errors >= ERROR_STORM {
            action = RecommendedAction::PauseAndRetry;
        }

        self.finish(ResponseAnalysis {
            status: if kind == ErrorKind::RateLimit {
                ResponseStatus::RateLimited
            } else {
                ResponseStatus::Error
            },
            rate_limit_detected: kind == ErrorKind::RateLimit,
            confidence,
            recommended_action: action,
            rate_limit_info: None,
            error_kind: Some(kind),
        })
    }

    /// Delay to wait before the next request, with ±10% jitter
    ///
    /// Always within `[500ms, max_delay]`.
    pub fn current_delay(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        let delay = self.compute_delay(jitter);
        self.state.current_delay_ms = delay.as_millis() as u64;
        delay
    }

    /// Returns true if the upstream currently looks healthy
    pub fn is_healthy(&self) -> bool {
        self.recent_error_rate() < UNHEALTHY_ERROR_RATE
            && self.state.consecutive_errors < UNHEALTHY_ERROR_STREAK
            && !self.state.is_rate_limited
            && self.state.avg_response_time_ms < UNHEALTHY_AVERAGE_MS
    }

    /// Share of failed requests over the last five minutes
    pub fn recent_error_rate(&self) -> f64 {
        let cutoff = Instant::now().checked_sub(HEALTH_WINDOW);
        let recent: Vec<&Observation> = self
            .history
            .iter()
            .filter(|o| cutoff.map_or(true, |c| o.at >= c))
            .collect();

        if recent.is_empty() {
            return 0.0;
        }
        let failed = recent.iter().filter(|o| o.failed).count();
        failed as f64 / recent.len() as f64
    }

    /// Forgets all history and returns to the initial pace
    pub fn reset(&mut self) {
        self.state = RateState::default();
        self.last_action = RecommendedAction::Continue;
        self.server_retry_after = None;
        self.history.clear();
        self.state.current_delay_ms = self.compute_delay(1.0).as_millis() as u64;
    }

    fn finish(&mut self, analysis: ResponseAnalysis) -> ResponseAnalysis {
        self.last_action = analysis.recommended_action;
        if analysis.recommended_action != RecommendedAction::Continue {
            tracing::debug!(
                status = analysis.status.as_str(),
                action = analysis.recommended_action.as_str(),
                confidence = analysis.confidence,
                consecutive_errors = self.state.consecutive_errors,
                consecutive_empty_pages = self.state.consecutive_empty_pages,
                "Rate controller adjusted pace"
            );
        }
        analysis
    }

    fn record(&mut self, elapsed: Duration, failed: bool) {
        self.record_at(Instant::now(), elapsed, failed);
    }

    fn record_at(&mut self, at: Instant, elapsed: Duration, failed: bool) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Observation {
            at,
            elapsed,
            failed,
        });

        let window: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(AVERAGE_WINDOW)
            .map(|o| o.elapsed.as_secs_f64() * 1000.0)
            .collect();
        self.state.avg_response_time_ms = window.iter().sum::<f64>() / window.len() as f64;
    }

    fn compute_delay(&self, jitter: f64) -> Duration {
        let base = self.config.base_delay as f64;
        let max = self.config.max_delay as f64;

        let mut delay = match self.last_action {
            RecommendedAction::Continue => base * 0.8,
            RecommendedAction::ReduceSpeed => base * 1.5,
            RecommendedAction::SlowDown => base * 3.0,
            RecommendedAction::CheckApiHealth => base * 5.0,
            RecommendedAction::Backoff => (base * 8.0).min(max),
            RecommendedAction::PauseAndRetry => (base * 15.0).min(max),
            RecommendedAction::Wait => self
                .server_retry_after
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(base * 10.0),
        };

        delay *= 1.4_f64.powi(self.state.consecutive_errors.min(5) as i32);
        delay *= 1.3_f64.powi(self.state.consecutive_empty_pages.min(3) as i32);
        if self.state.avg_response_time_ms > SLOW_AVERAGE_MS {
            delay *= 1.5;
        }
        delay *= jitter;

        let min = MIN_DELAY.as_millis() as f64;
        Duration::from_millis(delay.clamp(min, max.max(min)).round() as u64)
    }
}
