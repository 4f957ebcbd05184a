//! Bounded fan-out over a batch of units
//!
//! `max_concurrency` worker tasks pull units from a shared queue until it is
//! empty, so no more than that many units are ever in flight. Progress is
//! reported through the shared `ProgressTracker` and an unbounded event
//! channel; the batch finishes when every unit is completed, failed or
//! skipped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::executor::{RetryingExecutor, UnitOutcome};
use crate::progress::{ProgressStats, ProgressTracker};
use crate::unit::{UnitOfWork, VoiceConfig};

/// Lifecycle notification for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started { seq: u32 },
    Finished(UnitOutcome),
    /// Disabled by the caller, or never started because the batch was cancelled
    Skipped { seq: u32 },
}

/// Final result of a batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub id: Uuid,
    /// Outcomes of every unit that ran, sorted by sequence number
    pub outcomes: Vec<UnitOutcome>,
    /// Sequence numbers of skipped units, sorted
    pub skipped: Vec<u32>,
    pub stats: ProgressStats,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Handle to a running batch.
pub struct BatchRun {
    pub id: Uuid,
    pub progress: Arc<ProgressTracker>,
    pub events: mpsc::UnboundedReceiver<BatchEvent>,
    pub handle: JoinHandle<BatchReport>,
}

/// Everything a worker needs, shared by all workers of one batch.
struct BatchContext {
    id: Uuid,
    executor: Arc<RetryingExecutor>,
    queue: Mutex<VecDeque<UnitOfWork>>,
    candidates: Vec<String>,
    model: String,
    voice: VoiceConfig,
    progress: Arc<ProgressTracker>,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancel: CancellationToken,
}

impl BatchContext {
    fn next_unit(&self) -> Option<UnitOfWork> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn emit(&self, event: BatchEvent) {
        // Receiver may have been dropped by a caller that only wants the report
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct WorkerReport {
    outcomes: Vec<UnitOutcome>,
    skipped: Vec<u32>,
}

/// Runs batches with at most `max_concurrency` units in flight.
pub struct BoundedScheduler {
    executor: Arc<RetryingExecutor>,
    max_concurrency: usize,
}

impl BoundedScheduler {
    /// A `max_concurrency` of zero is treated as one.
    pub fn new(executor: Arc<RetryingExecutor>, max_concurrency: usize) -> Self {
        Self {
            executor,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Start a batch in the background.
    ///
    /// Disabled units are skipped up front and never reach the executor.
    /// Cancelling `cancel` stops units at their next wait; units not yet
    /// started are reported as skipped.
    pub fn run_batch(
        &self,
        units: Vec<UnitOfWork>,
        candidates: Vec<String>,
        model: impl Into<String>,
        voice: VoiceConfig,
        cancel: CancellationToken,
    ) -> BatchRun {
        let id = Uuid::new_v4();
        let progress = Arc::new(ProgressTracker::new(units.len()));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut skipped = Vec::new();
        let mut queue = VecDeque::with_capacity(units.len());
        for unit in units {
            if unit.enabled {
                queue.push_back(unit);
            } else {
                progress.skip_unit();
                let _ = tx.send(BatchEvent::Skipped { seq: unit.seq });
                skipped.push(unit.seq);
            }
        }

        let workers = self.max_concurrency.min(queue.len());
        info!(
            batch_id = %id,
            units = queue.len(),
            skipped = skipped.len(),
            workers,
            "starting batch"
        );

        let ctx = Arc::new(BatchContext {
            id,
            executor: self.executor.clone(),
            queue: Mutex::new(queue),
            candidates,
            model: model.into(),
            voice,
            progress: progress.clone(),
            events: tx,
            cancel,
        });

        let handle = tokio::spawn(drive(ctx, workers, skipped));

        BatchRun {
            id,
            progress,
            events: rx,
            handle,
        }
    }
}

async fn drive(ctx: Arc<BatchContext>, workers: usize, mut skipped: Vec<u32>) -> BatchReport {
    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(worker(ctx.clone()));
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => {
                outcomes.extend(report.outcomes);
                skipped.extend(report.skipped);
            }
            Err(e) => error!(batch_id = %ctx.id, error = %e, "batch worker failed"),
        }
    }

    outcomes.sort_by_key(|o| o.seq);
    skipped.sort_unstable();
    let stats = ctx.progress.stats();
    let report = BatchReport {
        id: ctx.id,
        outcomes,
        skipped,
        stats,
    };
    info!(
        batch_id = %report.id,
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped.len(),
        elapsed = %report.stats.elapsed_display(),
        "batch finished"
    );
    report
}

async fn worker(ctx: Arc<BatchContext>) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Some(unit) = ctx.next_unit() {
        if ctx.cancel.is_cancelled() {
            ctx.progress.skip_unit();
            ctx.emit(BatchEvent::Skipped { seq: unit.seq });
            report.skipped.push(unit.seq);
            continue;
        }

        ctx.progress.start_unit();
        ctx.emit(BatchEvent::Started { seq: unit.seq });

        let outcome = ctx
            .executor
            .process(&unit, &ctx.candidates, &ctx.model, &ctx.voice, &ctx.cancel)
            .await;

        if outcome.is_success() {
            ctx.progress.complete_unit(outcome.elapsed);
        } else {
            ctx.progress.fail_unit();
        }
        ctx.emit(BatchEvent::Finished(outcome.clone()));
        report.outcomes.push(outcome);
    }
    report
}
