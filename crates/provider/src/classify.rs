//! Quota detection for generation API responses
//!
//! Distinguishes daily quota exhaustion (429 naming a per-day quota, or a
//! bare RESOURCE_EXHAUSTED) from per-minute throttling (429 naming a
//! per-minute quota). Only daily exhaustion marks a key exhausted; per-minute
//! throttling is retried with backoff on whichever key ranks best next.

use crate::ErrorClassification;

/// Patterns in a 429 body that identify short-window throttling rather than
/// spent daily quota.
const PER_MINUTE_PATTERNS: &[&str] = &["perminute", "per minute", "per_minute"];

/// Classify a 429 response body as quota exhaustion or transient throttling.
pub fn classify_429(body: &str) -> ErrorClassification {
    let lower = body.to_lowercase();
    if PER_MINUTE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClassification::Transient;
    }
    ErrorClassification::QuotaExceeded
}

/// Classify an upstream error by HTTP status and response body.
///
/// 429 dispatches to `classify_429`. 400/401/403/404 are Permanent (bad
/// request, invalid key, unknown model). Everything else is Transient.
pub fn classify_status(status: u16, body: &str) -> ErrorClassification {
    match status {
        429 => classify_429(body),
        400 | 401 | 403 | 404 => ErrorClassification::Permanent,
        408 | 500 | 502 | 503 | 504 => ErrorClassification::Transient,
        _ => ErrorClassification::Transient,
    }
}
