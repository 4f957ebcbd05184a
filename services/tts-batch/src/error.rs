//! Service-specific error types

use std::path::PathBuf;

use thiserror::Error;

/// Startup errors that stop the run before any unit is scheduled.
///
/// Per-unit failures are reported in the batch outcome, never as errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no API keys found in {}", .0.display())]
    NoKeys(PathBuf),

    #[error("input text is empty")]
    EmptyInput,

    #[error("no input given; pass --input FILE (or - for stdin)")]
    MissingInput,

    #[error("none of the chunk files to merge exist")]
    NothingToMerge,

    #[error("{} does not match the format of the first chunk", .0.display())]
    MergeFormatMismatch(PathBuf),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
