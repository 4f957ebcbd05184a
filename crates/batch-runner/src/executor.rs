//! Per-unit retry loop
//!
//! Each attempt selects the best key, waits out that key's spacing interval,
//! calls the synthesizer and stores the artifact. The result of an attempt is
//! tagged as a `CallOutcome` and dispatched:
//!
//! - `Success`: record the request against the key and finish
//! - `QuotaExceeded`: mark the key exhausted and rotate immediately; does not
//!   consume an attempt or a backoff delay
//! - `Transient`: back off per `RetryPolicy` and retry; the key is charged an
//!   error only when attempts run out
//! - `Fatal`: charge the key an error and fail without retrying
//!
//! Cancellation is observed only while waiting (spacing, backoff) and while
//! the remote call is in flight. Key usage is recorded after those points, so
//! a cancelled unit leaves the pool untouched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use key_pool::KeyPool;
use provider::{ErrorClassification, SpeechRequest, SynthError, Synthesizer};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity::ActivityLog;
use crate::artifact::ArtifactSink;
use crate::metrics;
use crate::unit::{UnitOfWork, VoiceConfig};

/// Upper bound on the message part of a failure summary, in characters.
pub const SUMMARY_MESSAGE_LIMIT: usize = 100;

/// Attempt budget and backoff schedule for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries per unit, quota rotations excluded
    pub max_attempts: u32,
    /// Delay after the n-th failed attempt; the last entry repeats
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![Duration::from_secs(2), Duration::from_secs(5)],
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `index` (0-based).
    pub fn delay_for(&self, index: usize) -> Duration {
        self.delays
            .get(index)
            .or(self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Why a unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every candidate key is exhausted or at its daily limit
    NoCredentialsAvailable,
    /// Transient errors used up the attempt budget
    RetriesExhausted,
    /// The service rejected the request outright
    Fatal,
    /// The batch was cancelled while the unit was waiting or in flight
    Cancelled,
    /// The model is not in the limits table
    Configuration,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::NoCredentialsAvailable => "no_credentials",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Fatal => "fatal",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Configuration => "configuration",
        }
    }
}

/// A unit's terminal failure with a short display summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub summary: String,
}

/// Terminal result of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub seq: u32,
    /// Wall time from first selection to the terminal result
    pub elapsed: Duration,
    pub result: Result<PathBuf, UnitFailure>,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(|f| f.kind)
    }
}

/// `kind: message`, with the message cut to `SUMMARY_MESSAGE_LIMIT` characters.
pub fn summarize(kind: &str, message: &str) -> String {
    let message: String = message.chars().take(SUMMARY_MESSAGE_LIMIT).collect();
    format!("{kind}: {message}")
}

enum CallOutcome {
    Success(PathBuf),
    QuotaExceeded { kind: &'static str, message: String },
    Transient { kind: &'static str, message: String },
    Fatal { kind: &'static str, message: String },
}

impl From<SynthError> for CallOutcome {
    fn from(err: SynthError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err.classification() {
            ErrorClassification::QuotaExceeded => CallOutcome::QuotaExceeded { kind, message },
            ErrorClassification::Transient => CallOutcome::Transient { kind, message },
            ErrorClassification::Permanent => CallOutcome::Fatal { kind, message },
        }
    }
}

/// Drives single units to a terminal outcome.
pub struct RetryingExecutor {
    pool: Arc<KeyPool>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn ArtifactSink>,
    activity: Arc<ActivityLog>,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(
        pool: Arc<KeyPool>,
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn ArtifactSink>,
        activity: Arc<ActivityLog>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            synthesizer,
            sink,
            activity,
            policy,
        }
    }

    /// Process one unit with keys from `candidates`.
    pub async fn process(
        &self,
        unit: &UnitOfWork,
        candidates: &[String],
        model: &str,
        voice: &VoiceConfig,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        let started = Instant::now();
        let seq = unit.seq;
        let request = SpeechRequest {
            model: model.to_string(),
            voice: voice.voice.clone(),
            text: voice.payload(&unit.text),
        };
        let mut failed_attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(seq, started, None).await;
            }

            let key = match self.pool.select_best(candidates, model).await {
                Ok(Some(selected)) => selected.key,
                Ok(None) => {
                    let kind = FailureKind::NoCredentialsAvailable;
                    let label = "NoCredentialsAvailable";
                    return self
                        .fail(seq, started, None, kind, label, "all keys exhausted")
                        .await;
                }
                Err(e) => {
                    let kind = FailureKind::Configuration;
                    return self
                        .fail(seq, started, None, kind, "Configuration", &e.to_string())
                        .await;
                }
            };

            let wait = match self.pool.wait_time(key.expose(), model).await {
                Ok(wait) => wait,
                Err(e) => {
                    let kind = FailureKind::Configuration;
                    return self
                        .fail(seq, started, Some(&key), kind, "Configuration", &e.to_string())
                        .await;
                }
            };
            if !wait.is_zero() {
                debug!(
                    unit = seq,
                    key = %key,
                    wait_ms = wait.as_millis() as u64,
                    "spacing key usage"
                );
                if !sleep_or_cancel(wait, cancel).await {
                    return self.cancelled(seq, started, Some(&key)).await;
                }
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.cancelled(seq, started, Some(&key)).await;
                }
                response = self.synthesizer.synthesize(&key, &request) => response,
            };

            match self.store(seq, response).await {
                CallOutcome::Success(path) => {
                    self.pool.record_success(key.expose()).await;
                    let elapsed = started.elapsed();
                    self.activity.success(seq, &key, elapsed).await;
                    metrics::record_unit("completed", elapsed.as_secs_f64());
                    return UnitOutcome {
                        seq,
                        elapsed,
                        result: Ok(path),
                    };
                }
                CallOutcome::QuotaExceeded { kind, message } => {
                    self.activity.error(seq, Some(&key), kind, &message).await;
                    self.pool.record_failure(key.expose(), true).await;
                }
                CallOutcome::Fatal { kind, message } => {
                    self.pool.record_failure(key.expose(), false).await;
                    return self
                        .fail(seq, started, Some(&key), FailureKind::Fatal, kind, &message)
                        .await;
                }
                CallOutcome::Transient { kind, message } => {
                    failed_attempts += 1;
                    if failed_attempts >= self.policy.max_attempts {
                        self.pool.record_failure(key.expose(), false).await;
                        let terminal = FailureKind::RetriesExhausted;
                        return self
                            .fail(seq, started, Some(&key), terminal, kind, &message)
                            .await;
                    }

                    self.activity.error(seq, Some(&key), kind, &message).await;
                    let delay = self.policy.delay_for(failed_attempts as usize - 1);
                    self.activity.retry(seq, &key, failed_attempts, kind, delay).await;
                    metrics::record_retry(kind);
                    if !sleep_or_cancel(delay, cancel).await {
                        return self.cancelled(seq, started, Some(&key)).await;
                    }
                }
            }
        }
    }

    /// Turn a synthesizer response into a tagged outcome, storing the audio
    /// on success.
    async fn store(&self, seq: u32, response: provider::Result<Bytes>) -> CallOutcome {
        match response {
            Ok(audio) => match self.sink.materialize(seq, audio).await {
                Ok(path) => CallOutcome::Success(path),
                Err(e) => CallOutcome::Transient {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            },
            Err(e) => CallOutcome::from(e),
        }
    }

    /// Log a terminal failure and build its outcome.
    async fn fail(
        &self,
        seq: u32,
        started: Instant,
        key: Option<&Secret<String>>,
        kind: FailureKind,
        label: &str,
        message: &str,
    ) -> UnitOutcome {
        self.activity.error(seq, key, label, message).await;
        let elapsed = started.elapsed();
        metrics::record_unit(kind.label(), elapsed.as_secs_f64());
        UnitOutcome {
            seq,
            elapsed,
            result: Err(UnitFailure {
                kind,
                summary: summarize(label, message),
            }),
        }
    }

    async fn cancelled(
        &self,
        seq: u32,
        started: Instant,
        key: Option<&Secret<String>>,
    ) -> UnitOutcome {
        self.fail(seq, started, key, FailureKind::Cancelled, "Cancelled", "batch cancelled")
            .await
    }
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
