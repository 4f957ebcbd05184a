//! Batch progress counters and time estimates

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Completed share of `total`, rounded down
    pub percent: u32,
    /// Mean completed-unit duration times pending units; zero until a unit completes
    pub eta: Duration,
    pub elapsed: Duration,
}

impl ProgressStats {
    pub fn eta_display(&self) -> String {
        format_duration(self.eta)
    }

    pub fn elapsed_display(&self) -> String {
        format_duration(self.elapsed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: usize,
    in_progress: usize,
    failed: usize,
    skipped: usize,
    durations: Vec<Duration>,
}

/// Thread-safe progress counters for one batch.
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    started: Instant,
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut counters)
    }

    pub fn start_unit(&self) {
        self.with(|c| c.in_progress += 1);
    }

    pub fn complete_unit(&self, duration: Duration) {
        self.with(|c| {
            c.completed += 1;
            c.in_progress = c.in_progress.saturating_sub(1);
            c.durations.push(duration);
        });
    }

    pub fn fail_unit(&self) {
        self.with(|c| {
            c.failed += 1;
            c.in_progress = c.in_progress.saturating_sub(1);
        });
    }

    pub fn skip_unit(&self) {
        self.with(|c| c.skipped += 1);
    }

    pub fn stats(&self) -> ProgressStats {
        let elapsed = self.started.elapsed();
        self.with(|c| {
            let pending = self
                .total
                .saturating_sub(c.completed + c.failed + c.skipped);
            let percent = if self.total == 0 {
                0
            } else {
                (c.completed * 100 / self.total) as u32
            };
            let eta = if c.durations.is_empty() || pending == 0 {
                Duration::ZERO
            } else {
                let sum: Duration = c.durations.iter().sum();
                sum / c.durations.len() as u32 * pending as u32
            };
            ProgressStats {
                total: self.total,
                completed: c.completed,
                in_progress: c.in_progress,
                pending,
                failed: c.failed,
                skipped: c.skipped,
                percent,
                eta,
                elapsed,
            }
        })
    }
}

/// Human-readable duration: `42s`, `3m 5s` or `2h 14m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, secs % 3600 / 60)
    }
}
