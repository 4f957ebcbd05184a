//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env > `tts-batch.toml`.
//! A missing file at the default location means built-in defaults; a
//! missing file that was named explicitly is an error. `TTS_KEYS_FILE`
//! overrides `paths.keys_file` so key lists never need to live next to the
//! config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use batch_runner::{RetryPolicy, VoiceConfig};
use key_pool::{FLASH_TTS, LimitsTable, ModelLimits};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "tts-batch.toml";

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub paths: PathsConfig,
    pub retry: RetryConfig,
    pub api: ApiConfig,
    /// Per-model limits, overriding or extending the built-in table
    pub models: BTreeMap<String, ModelLimits>,
}

/// What to generate and how wide to fan out
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub voice: String,
    pub style: Option<String>,
    /// Units in flight; the model's default concurrency when unset
    pub max_parallel: Option<usize>,
    /// Target chunk length in characters
    pub chunk_size: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: FLASH_TTS.to_string(),
            voice: "Kore".to_string(),
            style: None,
            max_parallel: None,
            chunk_size: 3000,
        }
    }
}

/// File locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub keys_file: PathBuf,
    pub stats_file: PathBuf,
    pub activity_log: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            keys_file: PathBuf::from("api_keys.txt"),
            stats_file: PathBuf::from("api_keys_stats.json"),
            activity_log: PathBuf::from("generation_errors.log"),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Retry budget for transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delays_secs: Vec<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays_secs: vec![2.0, 5.0],
        }
    }
}

/// Remote service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: provider::gemini::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicitly named file, or from the default location if
    /// it exists, or fall back to built-in defaults.
    pub fn load_resolved(explicit: Option<&Path>) -> common::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load(default_path);
        }
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Resolve an explicit config path from the CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(p.to_path_buf());
        }
        std::env::var_os("CONFIG_PATH").map(PathBuf::from)
    }

    fn apply_env(&mut self) {
        if let Some(keys_file) = std::env::var_os("TTS_KEYS_FILE") {
            self.paths.keys_file = PathBuf::from(keys_file);
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        let limits = self.limits_table();
        if !limits.contains(&self.generation.model) {
            return Err(common::Error::config(format!(
                "unknown model {:?}; known models: {}",
                self.generation.model,
                limits.models().join(", ")
            )));
        }

        for (name, model) in &self.models {
            if Duration::try_from_secs_f64(model.min_interval_secs).is_err() {
                return Err(common::Error::config(format!(
                    "models.{name}.min_interval_secs must be a non-negative number of seconds"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(common::Error::config(
                "retry.max_attempts must be greater than 0",
            ));
        }
        if self.retry.delays_secs.is_empty() {
            return Err(common::Error::config(
                "retry.delays_secs must contain at least one delay",
            ));
        }
        if self
            .retry
            .delays_secs
            .iter()
            .any(|d| Duration::try_from_secs_f64(*d).is_err())
        {
            return Err(common::Error::config(
                "retry.delays_secs must be non-negative numbers of seconds",
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::config(format!(
                "api.base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(common::Error::config(
                "api.timeout_secs must be greater than 0",
            ));
        }

        if self.generation.chunk_size == 0 {
            return Err(common::Error::config(
                "generation.chunk_size must be greater than 0",
            ));
        }
        if self.generation.max_parallel == Some(0) {
            return Err(common::Error::config(
                "generation.max_parallel must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Built-in limits with `[models.*]` entries applied on top.
    pub fn limits_table(&self) -> LimitsTable {
        let mut table = LimitsTable::builtin();
        for (name, limits) in &self.models {
            table.insert(name.clone(), limits.clone());
        }
        table
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delays: self
                .retry
                .delays_secs
                .iter()
                .map(|d| Duration::from_secs_f64(*d))
                .collect(),
        }
    }

    /// Units in flight: `max_parallel`, else the model's default concurrency.
    pub fn concurrency(&self) -> usize {
        self.generation.max_parallel.unwrap_or_else(|| {
            self.limits_table()
                .get(&self.generation.model)
                .map(|l| l.default_concurrency)
                .unwrap_or(1)
        })
    }

    pub fn voice(&self) -> VoiceConfig {
        VoiceConfig {
            voice: self.generation.voice.clone(),
            style: self.generation.style.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
