//! Secret wrapper for API keys
//!
//! Keys are shown by their tail only (`...a1b2c3d4`) so operators can tell
//! them apart in logs without the full value ever being printed.

use std::fmt;
use zeroize::Zeroize;

/// Number of trailing characters shown when a key is redacted.
pub const REDACT_TAIL: usize = 8;

/// Render a key as `...` followed by its last few characters.
///
/// Short keys reveal at most half of their characters.
pub fn redact(value: &str) -> String {
    let len = value.chars().count();
    let shown = REDACT_TAIL.min(len / 2);
    let tail: String = value.chars().skip(len - shown).collect();
    format!("...{tail}")
}

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Tail-only rendering used in logs and the activity file.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Debug for Secret<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.redacted())
    }
}

impl fmt::Display for Secret<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}
