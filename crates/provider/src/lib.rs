//! Speech synthesis provider abstraction
//!
//! Defines the `Synthesizer` trait that decouples batch execution from the
//! remote generation service. The batch runner only needs one operation
//! (turn text into audio bytes with a given key) plus a classification of
//! failures that drives key rotation:
//! - QuotaExceeded marks the key exhausted and rotates to another key
//! - Permanent fails the unit without retry
//! - Transient is retried with backoff

pub mod classify;
pub mod gemini;

pub use classify::classify_status;
pub use gemini::GeminiSynthesizer;

use bytes::Bytes;
use common::Secret;
use std::future::Future;
use std::pin::Pin;

/// Classification of upstream errors to determine retry/rotation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Retryable (timeouts, 5xx, malformed responses)
    Transient,
    /// Daily quota for this key is spent, rotate to another key
    QuotaExceeded,
    /// Request or key rejected outright, retrying cannot help
    Permanent,
}

impl ErrorClassification {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::Permanent => "permanent",
        }
    }
}

/// One generation request: the text to speak and how to speak it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub model: String,
    pub voice: String,
    /// Final text sent upstream, style directive already prefixed
    pub text: String,
}

/// Errors from a synthesis call.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl SynthError {
    /// How the caller should react to this error.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            SynthError::Status { status, body } => classify_status(*status, body),
            SynthError::Http(_) | SynthError::Decode(_) => ErrorClassification::Transient,
        }
    }

    /// Short type name used in activity logs and failure summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            SynthError::Status { status: 429, .. } => "ResourceExhausted",
            SynthError::Status { .. } => "UpstreamStatus",
            SynthError::Http(_) => "HttpError",
            SynthError::Decode(_) => "DecodeError",
        }
    }
}

/// Result alias for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthError>;

/// Abstraction over the remote speech generation service.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Synthesizer>`), so fakes can be swapped in for tests.
pub trait Synthesizer: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Generate audio for `request` authenticated with `key`.
    ///
    /// Returns the raw audio payload exactly as the service produced it.
    fn synthesize<'a>(
        &'a self,
        key: &'a Secret<String>,
        request: &'a SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_quota_exceeded() {
        let err = SynthError::Status {
            status: 429,
            body: "RESOURCE_EXHAUSTED".into(),
        };
        assert_eq!(err.classification(), ErrorClassification::QuotaExceeded);
        assert_eq!(err.kind(), "ResourceExhausted");
    }

    #[test]
    fn transport_and_decode_errors_are_transient() {
        assert_eq!(
            SynthError::Http("connection reset".into()).classification(),
            ErrorClassification::Transient
        );
        assert_eq!(
            SynthError::Decode("no candidates".into()).classification(),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn error_display_includes_status_and_body() {
        let err = SynthError::Status {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "upstream returned 503: overloaded");
    }

    #[test]
    fn classification_labels() {
        assert_eq!(ErrorClassification::Transient.label(), "transient");
        assert_eq!(ErrorClassification::QuotaExceeded.label(), "quota_exceeded");
        assert_eq!(ErrorClassification::Permanent.label(), "permanent");
    }
}
