//! Append-only activity log
//!
//! One line per success, failure or retry:
//!
//! ```text
//! 2026-10-16 14:03:27 | ERROR | unit #07 | key ...a1b2c3d4 | ResourceExhausted: quota exceeded
//! ```
//!
//! The file is a convenience for operators, never a dependency: open and
//! write failures are reported through `tracing` and otherwise ignored.
//! Every event is also emitted as a `tracing` event.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Activity log writer shared by all executor tasks.
#[derive(Debug)]
pub struct ActivityLog {
    path: Option<PathBuf>,
    file: Mutex<Option<tokio::fs::File>>,
}

impl ActivityLog {
    /// Open `path` for appending, creating it if needed.
    ///
    /// If the file cannot be opened the log still works, emitting only
    /// `tracing` events.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await;
        match file {
            Ok(file) => Self {
                path: Some(path.to_path_buf()),
                file: Mutex::new(Some(file)),
            },
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot open activity log, file logging disabled"
                );
                Self::disabled()
            }
        }
    }

    /// Log that only emits `tracing` events.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn success(&self, seq: u32, key: &Secret<String>, elapsed: Duration) {
        info!(unit = seq, key = %key, elapsed_secs = elapsed.as_secs_f64(), "unit completed");
        let detail = format!("completed in {:.1}s", elapsed.as_secs_f64());
        self.append(Level::Info, seq, Some(key), &detail).await;
    }

    /// A failed attempt or a terminal failure. `key` is `None` when no key
    /// could be selected.
    pub async fn error(&self, seq: u32, key: Option<&Secret<String>>, kind: &str, message: &str) {
        warn!(unit = seq, key = %key_label(key), kind, message, "unit error");
        let detail = format!("{kind}: {message}");
        self.append(Level::Error, seq, key, &detail).await;
    }

    pub async fn retry(
        &self,
        seq: u32,
        key: &Secret<String>,
        attempt: u32,
        reason: &str,
        delay: Duration,
    ) {
        warn!(
            unit = seq,
            key = %key,
            attempt,
            reason,
            delay_secs = delay.as_secs_f64(),
            "retrying unit"
        );
        let detail = format!("attempt {attempt} | {reason} | retry in {}s", delay.as_secs_f64());
        self.append(Level::Warn, seq, Some(key), &detail).await;
    }

    async fn append(&self, level: Level, seq: u32, key: Option<&Secret<String>>, detail: &str) {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return;
        };
        let line = format_line(&timestamp(), level, seq, key, detail);
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "activity log write failed");
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn key_label(key: Option<&Secret<String>>) -> String {
    key.map_or_else(|| "N/A".to_string(), |k| k.redacted())
}

fn format_line(
    timestamp: &str,
    level: Level,
    seq: u32,
    key: Option<&Secret<String>>,
    detail: &str,
) -> String {
    // Keep one event per line even if an upstream message spans several
    let detail = detail.replace(['\r', '\n'], " ");
    format!(
        "{timestamp} | {} | unit #{seq:02} | key {} | {detail}\n",
        level.as_str(),
        key_label(key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Secret<String> {
        Secret::new("AIzaSyExampleKey-a1b2c3d4".to_string())
    }

    #[test]
    fn line_format_redacts_key() {
        let line = format_line(
            "2026-10-16 14:03:27",
            Level::Error,
            7,
            Some(&key()),
            "ResourceExhausted: quota exceeded",
        );
        assert_eq!(
            line,
            "2026-10-16 14:03:27 | ERROR | unit #07 | key ...a1b2c3d4 | ResourceExhausted: quota exceeded\n"
        );
        assert!(!line.contains("AIzaSy"));
    }

    #[test]
    fn line_without_key_and_multiline_detail() {
        let line = format_line("ts", Level::Warn, 123, None, "first\nsecond");
        assert_eq!(line, "ts | WARNING | unit #123 | key N/A | first second\n");
    }

    #[tokio::test]
    async fn events_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generation_errors.log");
        tokio::fs::write(&path, "existing line\n").await.unwrap();

        let log = ActivityLog::open(&path).await;
        log.success(1, &key(), Duration::from_millis(4200)).await;
        log.retry(2, &key(), 1, "HttpError", Duration::from_secs(2)).await;
        log.error(3, None, "NoCredentialsAvailable", "all keys exhausted").await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].ends_with("| INFO | unit #01 | key ...a1b2c3d4 | completed in 4.2s"));
        assert!(lines[2].ends_with("| WARNING | unit #02 | key ...a1b2c3d4 | attempt 1 | HttpError | retry in 2s"));
        assert!(lines[3].ends_with("| ERROR | unit #03 | key N/A | NoCredentialsAvailable: all keys exhausted"));
    }

    #[tokio::test]
    async fn unopenable_path_degrades_to_tracing_only() {
        let log = ActivityLog::open("/nonexistent/dir/activity.log").await;
        assert!(log.path().is_none());
        log.error(1, Some(&key()), "HttpError", "boom").await;
    }
}
