//! In-process fakes for executor and scheduler tests

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use key_pool::{KeyPool, LimitsTable, ModelLimits, SystemClock, UsageStore};
use provider::{SpeechRequest, SynthError, Synthesizer};

use crate::artifact::{ArtifactSink, SinkError};

pub(crate) const MODEL: &str = "test-tts";

pub(crate) fn quota() -> SynthError {
    SynthError::Status {
        status: 429,
        body: "Resource has been exhausted (e.g. check quota).".into(),
    }
}

pub(crate) fn transient() -> SynthError {
    SynthError::Http("connection reset by peer".into())
}

pub(crate) fn permanent() -> SynthError {
    SynthError::Status {
        status: 400,
        body: "API key not valid".into(),
    }
}

pub(crate) fn keys(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// In-memory pool with one model and the given limits.
pub(crate) async fn pool(per_day: u32, interval_secs: f64, ids: &[&str]) -> Arc<KeyPool> {
    let mut limits = LimitsTable::empty();
    limits.insert(
        MODEL,
        ModelLimits {
            requests_per_day: per_day,
            requests_per_minute: 60,
            min_interval_secs: interval_secs,
            default_concurrency: 3,
        },
    );
    let pool = KeyPool::open(UsageStore::in_memory(), limits, Arc::new(SystemClock)).await;
    pool.load_keys(&ids.join("\n")).await;
    Arc::new(pool)
}

/// Synthesizer that replays a script of results, then succeeds forever.
pub(crate) struct ScriptedSynthesizer {
    script: Mutex<VecDeque<Result<Bytes, SynthError>>>,
    calls: Mutex<Vec<(String, String)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub(crate) fn new(script: Vec<Result<Bytes, SynthError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// (key, text) of every call, in call order
    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Synthesizer for ScriptedSynthesizer {
    fn id(&self) -> &str {
        "scripted"
    }

    fn synthesize<'a>(
        &'a self,
        key: &'a Secret<String>,
        request: &'a SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = provider::Result<Bytes>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((key.expose().clone(), request.text.clone()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Bytes::from_static(b"RIFF\0\0\0\0WAVEfmt ")))
        })
    }
}

/// Sink that remembers which units it stored, optionally failing first.
#[derive(Default)]
pub(crate) struct MemorySink {
    stored: Mutex<Vec<u32>>,
    fail_first: AtomicUsize,
}

impl MemorySink {
    pub(crate) fn failing(times: usize) -> Self {
        Self {
            stored: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(times),
        }
    }

    pub(crate) fn stored(&self) -> Vec<u32> {
        self.stored.lock().unwrap().clone()
    }
}

impl ArtifactSink for MemorySink {
    fn materialize<'a>(
        &'a self,
        seq: u32,
        _audio: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let should_fail = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            self.stored.lock().unwrap().push(seq);
            Ok(PathBuf::from(format!("{seq:02}.wav")))
        })
    }
}
