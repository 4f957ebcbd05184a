//! Batch metrics
//!
//! - `batch_units_total` (counter): label `outcome` (`completed`, or the failure kind)
//! - `batch_unit_duration_seconds` (histogram): label `outcome`
//! - `batch_retries_total` (counter): label `reason`
//!
//! Key-level counters (`pool_selections_total`, `pool_key_errors_total`) are
//! emitted by the key pool itself.

/// Record a unit reaching a terminal outcome.
pub fn record_unit(outcome: &str, duration_secs: f64) {
    metrics::counter!("batch_units_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("batch_unit_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record a transient failure that will be retried after backoff.
pub fn record_retry(reason: &str) {
    metrics::counter!("batch_retries_total", "reason" => reason.to_string()).increment(1);
}
