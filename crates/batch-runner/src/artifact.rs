//! Artifact materialization seam

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;

/// Errors from persisting an artifact. The executor treats them as transient.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failed: {0}")]
    Encode(String),
}

impl SinkError {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Io(_) => "IoError",
            SinkError::Encode(_) => "EncodeError",
        }
    }
}

/// Persists the audio payload of a finished unit.
pub trait ArtifactSink: Send + Sync {
    /// Store `audio` for unit `seq` and return where it was written.
    fn materialize<'a>(
        &'a self,
        seq: u32,
        audio: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, SinkError>> + Send + 'a>>;
}
