//! Per-model request limits
//!
//! Each key gets the same allowance per model: a daily request cap and a
//! minimum spacing between two uses of the same key. The per-minute figure
//! is informational; spacing is what the pool enforces.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Free-tier flash TTS model.
pub const FLASH_TTS: &str = "gemini-2.5-flash-preview-tts";
/// Free-tier pro TTS model.
pub const PRO_TTS: &str = "gemini-2.5-pro-preview-tts";

/// Limits applied to every key for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub requests_per_day: u32,
    /// Informational only
    pub requests_per_minute: u32,
    /// Minimum spacing between two uses of the same key
    pub min_interval_secs: f64,
    /// Parallelism used when the caller does not specify one
    pub default_concurrency: usize,
}

impl ModelLimits {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_interval_secs.max(0.0))
    }
}

/// Read-only model → limits mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsTable {
    models: HashMap<String, ModelLimits>,
}

impl LimitsTable {
    /// Empty table, mostly useful for tests.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Free-tier limits for the TTS preview models.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert(
            FLASH_TTS,
            ModelLimits {
                requests_per_day: 250,
                requests_per_minute: 15,
                min_interval_secs: 4.0,
                default_concurrency: 15,
            },
        );
        table.insert(
            PRO_TTS,
            ModelLimits {
                requests_per_day: 100,
                requests_per_minute: 5,
                min_interval_secs: 12.0,
                default_concurrency: 8,
            },
        );
        table
    }

    /// Add or replace the limits for `model`.
    pub fn insert(&mut self, model: impl Into<String>, limits: ModelLimits) {
        self.models.insert(model.into(), limits);
    }

    pub fn get(&self, model: &str) -> Result<&ModelLimits> {
        self.models
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Known model names, sorted.
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for LimitsTable {
    fn default() -> Self {
        Self::builtin()
    }
}
