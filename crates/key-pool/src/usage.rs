//! Per-key usage record and the daily reset rule

use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Usage state for one key, persisted verbatim in the usage store.
///
/// Field names follow the store format (`requestsToday`, `resetTime`, ...);
/// the snake_case names written by older stats files are accepted on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsage {
    #[serde(default, alias = "requests_today")]
    pub requests_today: u32,
    /// Local midnight at which the counters next zero
    #[serde(default, alias = "reset_time")]
    pub reset_time: Option<NaiveDateTime>,
    /// Unix seconds of the last successful request, 0 if never used
    #[serde(default, alias = "last_request")]
    pub last_request_at: f64,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default, alias = "error_count")]
    pub error_count: u32,
}

impl KeyUsage {
    /// Requests left today under `limit`.
    pub fn remaining(&self, limit: u32) -> u32 {
        limit.saturating_sub(self.requests_today)
    }

    /// Whether the key may serve another request today.
    pub fn is_available(&self, limit: u32) -> bool {
        !self.exhausted && self.requests_today < limit
    }

    pub fn needs_reset(&self, now: NaiveDateTime) -> bool {
        self.reset_time.is_none_or(|at| now >= at)
    }

    /// Time the key must rest before its next use.
    ///
    /// A clock that moved backwards never yields more than `min_interval`.
    pub fn wait_time(&self, min_interval: Duration, now_epoch_secs: f64) -> Duration {
        if self.last_request_at <= 0.0 {
            return Duration::ZERO;
        }
        let elapsed = (now_epoch_secs - self.last_request_at).max(0.0);
        let wait = min_interval.as_secs_f64() - elapsed;
        if wait <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(wait)
        }
    }

    /// Zero the daily counters and the sticky flags.
    pub fn clear(&mut self) {
        self.requests_today = 0;
        self.exhausted = false;
        self.error_count = 0;
    }
}

/// The first instant of the day after `now`.
pub fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    today.succ_opt().unwrap_or(today).and_time(NaiveTime::MIN)
}

/// Apply the daily reset rule to one record.
///
/// If the reset time has passed (or was never set) the counters and flags
/// are zeroed and the reset time moves to the next midnight. Otherwise the
/// record is returned unchanged.
pub fn maybe_reset(mut usage: KeyUsage, now: NaiveDateTime) -> KeyUsage {
    if usage.needs_reset(now) {
        usage.clear();
        usage.reset_time = Some(next_midnight(now));
    }
    usage
}
