//! Rate adaptation for the source API
//!
//! This module turns every request outcome into a pacing decision:
//! - Classification of responses (success, slow, empty, error, throttled)
//! - Recognition of rate-limit headers and throttling phrases
//! - Delay computation with error/empty-page penalties and jitter
//! - A deterministic health verdict for reporting and supervision

mod analysis;
mod controller;
mod headers;

pub use analysis::{
    ErrorKind, RateLimitInfo, RecommendedAction, ResponseAnalysis, ResponseSnapshot,
    ResponseStatus,
};
pub use controller::{RateAdaptiveController, RateState, MIN_DELAY};
pub use headers::{
    contains_throttle_phrase, is_structurally_empty, parse_rate_limit_info, parse_retry_after,
};
