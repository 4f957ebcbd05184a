//! Key selection, usage accounting and quota-aware rotation
//!
//! The pool owns one `KeyUsage` record per key. Every operation takes the
//! single state mutex, applies the lazy daily reset, does its work and, if it
//! changed anything, rewrites the usage file before releasing the lock. No
//! caller ever observes a half-updated record.
//!
//! Selection ranks available keys (not exhausted, under the daily limit) by:
//! 1. fewest cumulative errors
//! 2. most remaining quota
//! 3. fewest requests today
//!
//! Ties keep candidate order.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{Secret, redact};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::limits::LimitsTable;
use crate::store::UsageStore;
use crate::usage::{KeyUsage, maybe_reset};

/// A key chosen to serve the next request.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub key: Secret<String>,
    /// Requests left today at selection time
    pub remaining: u32,
    pub limit: u32,
}

/// Display statistics for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
    pub percent: u32,
    pub exhausted: bool,
}

/// Display statistics for a set of keys.
///
/// Exhausted keys count as fully used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// "healthy" when every key can serve, "degraded" when some can,
    /// "unhealthy" when none can
    pub status: &'static str,
    pub total_keys: usize,
    pub active_keys: usize,
    pub exhausted_keys: usize,
    pub available_keys: usize,
    pub total_used: u64,
    pub total_remaining: u64,
    pub total_limit: u64,
    pub percent: u32,
}

/// Parse a newline-delimited key list.
///
/// Blank lines and `#` comments are skipped, surrounding whitespace is
/// trimmed, and duplicates keep their first position.
pub fn parse_key_source(source: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

fn percent_of(used: u64, limit: u64) -> u32 {
    if limit == 0 {
        0
    } else {
        (used * 100 / limit) as u32
    }
}

/// Pool of API keys sharing one usage-state file.
///
/// Constructed once per process and shared by handle (`Arc<KeyPool>`); tests
/// build isolated pools with an in-memory store and a manual clock.
pub struct KeyPool {
    state: Mutex<HashMap<String, KeyUsage>>,
    store: UsageStore,
    limits: LimitsTable,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    /// Open the pool, loading any persisted usage state.
    ///
    /// An unreadable or corrupt state file is logged and the pool starts
    /// empty; later writes will replace it.
    pub async fn open(store: UsageStore, limits: LimitsTable, clock: Arc<dyn Clock>) -> Self {
        let mut state = match store.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "failed to load usage state, continuing with empty state");
                HashMap::new()
            }
        };

        let now = clock.now().naive_local();
        let changed = reset_expired(&mut state, now);

        if changed && let Err(e) = store.save(&state).await {
            warn!(error = %e, "failed to persist usage state, continuing in memory");
        }
        info!(keys = state.len(), "key pool initialized");

        Self {
            state: Mutex::new(state),
            store,
            limits,
            clock,
        }
    }

    /// Register every key in `source`, returning them in source order.
    ///
    /// Keys already known keep their usage counters.
    pub async fn load_keys(&self, source: &str) -> Vec<String> {
        let keys = parse_key_source(source);

        let mut state = self.state.lock().await;
        let now = self.clock.now().naive_local();
        let mut changed = reset_expired(&mut state, now);
        let mut added = 0usize;
        for key in &keys {
            if !state.contains_key(key) {
                state.insert(key.clone(), maybe_reset(KeyUsage::default(), now));
                added += 1;
                changed = true;
            }
        }
        if changed {
            self.persist(&state).await;
        }
        info!(keys = keys.len(), added, "loaded API keys");
        keys
    }

    /// Read a key list from disk. A missing file yields no keys.
    pub async fn load_keys_from_file(&self, path: &Path) -> Result<Vec<String>> {
        let source = match tokio::fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "key file not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::KeySource(format!("reading {}: {e}", path.display())));
            }
        };
        Ok(self.load_keys(&source).await)
    }

    /// Pick the best available key among `candidates` for `model`.
    ///
    /// Returns `Ok(None)` when every candidate is exhausted or at its daily
    /// limit; that is the normal "pool depleted" signal, not an error.
    pub async fn select_best(
        &self,
        candidates: &[String],
        model: &str,
    ) -> Result<Option<SelectedKey>> {
        let limit = self.limits.get(model)?.requests_per_day;

        let mut state = self.state.lock().await;
        let now = self.clock.now().naive_local();
        let mut changed = reset_expired(&mut state, now);

        for key in candidates {
            if !state.contains_key(key) {
                state.insert(key.clone(), maybe_reset(KeyUsage::default(), now));
                changed = true;
            }
        }

        let best = candidates
            .iter()
            .filter_map(|key| state.get(key).map(|usage| (key, usage)))
            .filter(|(_, usage)| usage.is_available(limit))
            .min_by_key(|(_, usage)| {
                (
                    usage.error_count,
                    std::cmp::Reverse(usage.remaining(limit)),
                    usage.requests_today,
                )
            })
            .map(|(key, usage)| SelectedKey {
                key: Secret::new(key.clone()),
                remaining: usage.remaining(limit),
                limit,
            });

        if changed {
            self.persist(&state).await;
        }
        drop(state);

        match &best {
            Some(selected) => {
                debug!(
                    key = %selected.key,
                    remaining = selected.remaining,
                    limit,
                    "selected key"
                );
                metrics::counter!("pool_selections_total", "result" => "selected").increment(1);
            }
            None => {
                warn!(candidates = candidates.len(), model, "all keys exhausted");
                metrics::counter!("pool_selections_total", "result" => "depleted").increment(1);
            }
        }
        Ok(best)
    }

    /// How long `key` must rest before its next use under `model`.
    pub async fn wait_time(&self, key: &str, model: &str) -> Result<Duration> {
        let interval = self.limits.get(model)?.min_interval();
        let state = self.state.lock().await;
        let now = epoch_secs(self.clock.as_ref());
        Ok(state
            .get(key)
            .map(|usage| usage.wait_time(interval, now))
            .unwrap_or(Duration::ZERO))
    }

    /// Count a completed request against `key`.
    pub async fn record_success(&self, key: &str) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        reset_expired(&mut state, now.naive_local());
        let Some(usage) = state.get_mut(key) else {
            debug!(key = %redact(key), "success for unknown key ignored");
            return;
        };
        usage.requests_today += 1;
        usage.last_request_at = now.timestamp_millis() as f64 / 1000.0;
        let requests_today = usage.requests_today;
        self.persist(&state).await;
        debug!(key = %redact(key), requests_today, "recorded request");
    }

    /// Count a failure against `key`; quota failures make it exhausted until
    /// the next reset.
    pub async fn record_failure(&self, key: &str, quota_exceeded: bool) {
        let mut state = self.state.lock().await;
        reset_expired(&mut state, self.clock.now().naive_local());
        let Some(usage) = state.get_mut(key) else {
            debug!(key = %redact(key), "failure for unknown key ignored");
            return;
        };
        usage.error_count += 1;
        if quota_exceeded {
            usage.exhausted = true;
            warn!(key = %redact(key), "key exhausted (quota exceeded)");
        }
        let error_count = usage.error_count;
        self.persist(&state).await;

        let kind = if quota_exceeded { "quota" } else { "other" };
        metrics::counter!("pool_key_errors_total", "kind" => kind).increment(1);
        debug!(key = %redact(key), error_count, quota_exceeded, "recorded key failure");
    }

    /// Operator reset: zero counters and clear exhaustion for every key.
    pub async fn reset_all(&self) {
        let mut state = self.state.lock().await;
        for usage in state.values_mut() {
            usage.clear();
        }
        self.persist(&state).await;
        info!(keys = state.len(), "reset usage for all keys");
    }

    /// Usage statistics for one key. Unknown keys report as unused.
    pub async fn stats_for(&self, key: &str, model: &str) -> Result<KeyStats> {
        let limit = self.limits.get(model)?.requests_per_day;
        let mut state = self.state.lock().await;
        if reset_expired(&mut state, self.clock.now().naive_local()) {
            self.persist(&state).await;
        }
        let usage = state.get(key).cloned().unwrap_or_default();

        if usage.exhausted {
            return Ok(KeyStats {
                used: limit,
                remaining: 0,
                limit,
                percent: 100,
                exhausted: true,
            });
        }
        Ok(KeyStats {
            used: usage.requests_today,
            remaining: usage.remaining(limit),
            limit,
            percent: percent_of(usage.requests_today as u64, limit as u64),
            exhausted: false,
        })
    }

    /// Aggregate statistics over `candidates`.
    pub async fn aggregate_stats(&self, candidates: &[String], model: &str) -> Result<PoolStats> {
        let limit = self.limits.get(model)?.requests_per_day;
        let mut state = self.state.lock().await;
        if reset_expired(&mut state, self.clock.now().naive_local()) {
            self.persist(&state).await;
        }

        let total_limit = limit as u64 * candidates.len() as u64;
        let mut total_used = 0u64;
        let mut active_keys = 0usize;
        let mut exhausted_keys = 0usize;
        let mut available_keys = 0usize;

        for key in candidates {
            match state.get(key) {
                Some(usage) if usage.exhausted => {
                    total_used += limit as u64;
                    exhausted_keys += 1;
                }
                Some(usage) => {
                    total_used += usage.requests_today.min(limit) as u64;
                    active_keys += 1;
                    if usage.is_available(limit) {
                        available_keys += 1;
                    }
                }
                None => {
                    active_keys += 1;
                    if limit > 0 {
                        available_keys += 1;
                    }
                }
            }
        }

        let status = if available_keys == candidates.len() && !candidates.is_empty() {
            "healthy"
        } else if available_keys > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        Ok(PoolStats {
            status,
            total_keys: candidates.len(),
            active_keys,
            exhausted_keys,
            available_keys,
            total_used,
            total_remaining: total_limit.saturating_sub(total_used),
            total_limit,
            percent: percent_of(total_used, total_limit),
        })
    }

    /// Snapshot of one key's raw usage record.
    pub async fn usage(&self, key: &str) -> Option<KeyUsage> {
        self.state.lock().await.get(key).cloned()
    }

    /// Number of keys with a usage record, including ones no longer listed.
    pub async fn key_count(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Write state to disk; failures degrade to in-memory operation.
    async fn persist(&self, state: &HashMap<String, KeyUsage>) {
        if let Err(e) = self.store.save(state).await {
            warn!(error = %e, "failed to persist usage state, continuing in memory");
        }
    }
}

/// Apply the daily reset to every record. Returns whether anything changed.
fn reset_expired(state: &mut HashMap<String, KeyUsage>, now: chrono::NaiveDateTime) -> bool {
    let mut changed = false;
    for (key, usage) in state.iter_mut() {
        if usage.needs_reset(now) {
            if usage.reset_time.is_some() {
                info!(key = %redact(key), "daily reset");
            }
            *usage = maybe_reset(std::mem::take(usage), now);
            changed = true;
        }
    }
    changed
}

fn epoch_secs(clock: &dyn Clock) -> f64 {
    clock.now().timestamp_millis() as f64 / 1000.0
}
