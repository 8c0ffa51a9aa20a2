//! Recognition of throttling signals in headers and bodies

use crate::rate::analysis::RateLimitInfo;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cap for server-supplied waits (1 hour)
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Reset values above this are absolute epoch seconds rather than deltas
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

/// Only the head of a body is scanned for throttling phrases
const PHRASE_SCAN_LIMIT: usize = 4096;

const THROTTLE_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "slow down",
    "quota exceeded",
    "throttled",
    "try again later",
];

const REMAINING_HEADERS: &[&str] = &[
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];

const LIMIT_HEADERS: &[&str] = &["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];

const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "x-rate-limit-reset", "ratelimit-reset"];

/// Extracts quota information from response headers
pub fn parse_rate_limit_info(headers: &HeaderMap) -> RateLimitInfo {
    let mut info = RateLimitInfo {
        retry_after: header_str(headers, "retry-after").and_then(parse_retry_after),
        remaining: first_numeric(headers, REMAINING_HEADERS),
        limit: first_numeric(headers, LIMIT_HEADERS),
        reset_after: first_numeric(headers, RESET_HEADERS).map(reset_delta),
    };

    // An exhausted window with a known reset is as good as a Retry-After
    if info.retry_after.is_none() && info.remaining == Some(0) {
        info.retry_after = info.reset_after;
    }

    info
}

/// Parses a Retry-After header value (delta-seconds or HTTP-date)
///
/// Returns None for negative, past, or unparseable values. Values beyond one
/// hour are capped.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            tracing::debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        return Some(Duration::from_secs(seconds as u64).min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        return datetime
            .duration_since(SystemTime::now())
            .ok()
            .map(|d| d.min(MAX_RETRY_AFTER));
    }

    tracing::debug!(value = header_value, "unparseable Retry-After value");
    None
}

/// Returns true if the head of the body mentions throttling
pub fn contains_throttle_phrase(body: &str) -> bool {
    let mut end = body.len().min(PHRASE_SCAN_LIMIT);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let head = body[..end].to_lowercase();
    THROTTLE_PHRASES.iter().any(|phrase| head.contains(phrase))
}

/// Returns true if a response body carries no usable content
///
/// A body is empty when it is not JSON, reports an `error`/`fail`/`false`
/// status, has no `data`, or has an empty item list.
pub fn is_structurally_empty(body: &str) -> bool {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return true,
    };

    match value.get("status") {
        Some(Value::String(s)) => {
            let s = s.to_ascii_lowercase();
            if s == "error" || s == "fail" || s == "failed" {
                return true;
            }
        }
        Some(Value::Bool(false)) => return true,
        _ => {}
    }

    match value.get("data") {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(data)) => match data.get("items") {
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Null) => true,
            Some(_) => false,
            None => match data.get("item") {
                Some(Value::Null) => true,
                Some(_) => false,
                None => data.is_empty(),
            },
        },
        Some(_) => false,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn first_numeric(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find_map(|v| v.trim().parse::<u64>().ok())
}

fn reset_delta(value: u64) -> Duration {
    if value > EPOCH_THRESHOLD {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Duration::from_secs(value.saturating_sub(now)).min(MAX_RETRY_AFTER)
    } else {
        Duration::from_secs(value).min(MAX_RETRY_AFTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = SystemTime::now() + Duration::from_secs(90);
        let value = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&value).unwrap();
        assert!(parsed <= Duration::from_secs(90));
        assert!(parsed >= Duration::from_secs(80));

        let past = httpdate::fmt_http_date(SystemTime::now() - Duration::from_secs(90));
        assert_eq!(parse_retry_after(&past), None);
    }

    #[test]
    fn test_parse_rate_limit_headers() {
        let info = parse_rate_limit_info(&headers(&[
            ("x-ratelimit-remaining", "2"),
            ("x-ratelimit-limit", "60"),
        ]));
        assert_eq!(info.remaining, Some(2));
        assert_eq!(info.limit, Some(60));
        assert!(info.is_quota_low());
        assert!(info.retry_after.is_none());
    }

    #[test]
    fn test_exhausted_window_uses_reset() {
        let info = parse_rate_limit_info(&headers(&[
            ("ratelimit-remaining", "0"),
            ("ratelimit-reset", "30"),
        ]));
        assert_eq!(info.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_no_headers() {
        let info = parse_rate_limit_info(&HeaderMap::new());
        assert!(!info.is_present());
    }

    #[test]
    fn test_throttle_phrases() {
        assert!(contains_throttle_phrase("Too Many Requests, please slow down"));
        assert!(contains_throttle_phrase(r#"{"msg":"Rate limit exceeded"}"#));
        assert!(!contains_throttle_phrase(r#"{"status":"success"}"#));
    }

    #[test]
    fn test_structurally_empty() {
        assert!(is_structurally_empty("<html>oops</html>"));
        assert!(is_structurally_empty(r#"{"status":"error","msg":"x"}"#));
        assert!(is_structurally_empty(r#"{"status":false,"data":{"items":[1]}}"#));
        assert!(is_structurally_empty(r#"{"status":"success"}"#));
        assert!(is_structurally_empty(r#"{"status":"success","data":{"items":[]}}"#));
        assert!(is_structurally_empty(r#"{"status":"success","data":{"item":null}}"#));

        assert!(!is_structurally_empty(
            r#"{"status":"success","data":{"items":[{"slug":"a"}]}}"#
        ));
        assert!(!is_structurally_empty(
            r#"{"status":"success","data":{"item":{"slug":"a"}}}"#
        ));
    }
}
