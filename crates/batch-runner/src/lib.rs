//! Batch execution of speech generation units
//!
//! Three layers, each usable on its own:
//! - `ProgressTracker` counts units through their lifecycle and estimates
//!   the time remaining
//! - `RetryingExecutor` drives one unit to a terminal outcome, rotating keys
//!   on quota errors and backing off on transient ones
//! - `BoundedScheduler` runs a whole batch with at most N units in flight
//!
//! Artifact persistence and the remote call are collaborators behind the
//! `ArtifactSink` and `provider::Synthesizer` traits.

pub mod activity;
pub mod artifact;
pub mod executor;
pub mod metrics;
pub mod progress;
pub mod scheduler;
pub mod unit;

#[cfg(test)]
mod testing;

pub use activity::ActivityLog;
pub use artifact::{ArtifactSink, SinkError};
pub use executor::{FailureKind, RetryPolicy, RetryingExecutor, UnitFailure, UnitOutcome};
pub use progress::{ProgressStats, ProgressTracker, format_duration};
pub use scheduler::{BatchEvent, BatchReport, BatchRun, BoundedScheduler};
pub use unit::{UnitOfWork, VoiceConfig};
