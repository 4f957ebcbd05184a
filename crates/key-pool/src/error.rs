//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("usage state persistence failed: {0}")]
    Persistence(String),

    #[error("key source error: {0}")]
    KeySource(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
