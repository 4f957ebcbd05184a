//! Batch text-to-speech generator
//!
//! Single-binary CLI that:
//! 1. Splits an input text into paragraph-aligned chunks
//! 2. Rotates a pool of API keys under per-key daily quotas and spacing
//! 3. Generates one audio file per chunk with bounded parallelism
//! 4. Persists key usage so quotas survive restarts
//! 5. Optionally merges the chunks into one WAV file

mod chunk;
mod config;
mod error;
mod metrics;
mod wav;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use batch_runner::{
    ActivityLog, BatchEvent, BatchReport, BoundedScheduler, ProgressTracker, RetryingExecutor,
    UnitOfWork,
};
use clap::{Parser, ValueEnum};
use common::redact;
use key_pool::{KeyPool, SystemClock, UsageStore};
use provider::{GeminiSynthesizer, Synthesizer};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::chunk::{DEFAULT_TOLERANCE, split_by_paragraphs};
use crate::config::Config;
use crate::wav::WavSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Parser)]
#[command(name = "tts-batch")]
#[command(about = "Generate speech for a long text with a rotating pool of API keys")]
#[command(version)]
struct Cli {
    /// Config file (default: $CONFIG_PATH, then ./tts-batch.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text to synthesize; `-` reads stdin
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Print per-key usage as JSON and exit
    #[arg(long)]
    stats: bool,

    /// Zero every key's counters before doing anything else
    #[arg(long)]
    reset_stats: bool,

    /// Unit numbers to leave out, e.g. `--skip 3,7`
    #[arg(long, value_delimiter = ',')]
    skip: Vec<u32>,

    /// Join the chunk WAVs into this file once every unit has succeeded
    #[arg(long, value_name = "PATH")]
    merge: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the JSON result
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("starting tts-batch");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let explicit_config = Config::resolve_path(cli.config.as_deref());
    let config = Config::load_resolved(explicit_config.as_deref()).with_context(|| {
        match &explicit_config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load default configuration".to_string(),
        }
    })?;

    let model = config.generation.model.clone();
    info!(
        model = %model,
        voice = %config.generation.voice,
        concurrency = config.concurrency(),
        keys_file = %config.paths.keys_file.display(),
        "configuration loaded"
    );

    let pool = Arc::new(
        KeyPool::open(
            UsageStore::new(&config.paths.stats_file),
            config.limits_table(),
            Arc::new(SystemClock),
        )
        .await,
    );
    let keys = pool
        .load_keys_from_file(&config.paths.keys_file)
        .await
        .with_context(|| format!("failed to read keys from {}", config.paths.keys_file.display()))?;

    if cli.reset_stats {
        pool.reset_all().await;
    }

    if cli.stats {
        let stats = stats_json(&pool, &keys, &model).await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(input) = cli.input else {
        if cli.reset_stats {
            return Ok(ExitCode::SUCCESS);
        }
        return Err(error::Error::MissingInput.into());
    };
    if keys.is_empty() {
        return Err(error::Error::NoKeys(config.paths.keys_file.clone()).into());
    }

    let text = read_input(&input)
        .await
        .with_context(|| format!("failed to read input from {}", input.display()))?;
    let chunks = split_by_paragraphs(&text, config.generation.chunk_size, DEFAULT_TOLERANCE);
    let units = build_units(chunks, &cli.skip)?;
    info!(units = units.len(), skipped = cli.skip.len(), "input split into units");

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let synthesizer = Arc::new(GeminiSynthesizer::new(
        client,
        config.api.base_url.clone(),
        config.timeout(),
    ));
    info!(provider = synthesizer.id(), base_url = %config.api.base_url, "synthesizer ready");
    let sink = Arc::new(WavSink::new(&config.paths.output_dir));
    let activity = Arc::new(ActivityLog::open(&config.paths.activity_log).await);
    let executor = Arc::new(RetryingExecutor::new(
        pool.clone(),
        synthesizer,
        sink.clone(),
        activity,
        config.retry_policy(),
    ));
    let scheduler = BoundedScheduler::new(executor, config.concurrency());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("cancelling batch, waiting for in-flight units to stop");
            cancel.cancel();
        }
    });

    let seqs: Vec<u32> = units.iter().map(|u| u.seq).collect();
    let mut run = scheduler.run_batch(units, keys.clone(), model.clone(), config.voice(), cancel);
    info!(batch_id = %run.id, "batch started");
    while let Some(event) = run.events.recv().await {
        log_event(&event, &run.progress);
    }
    let report = run.handle.await.context("batch task failed")?;

    let pool_stats = pool.aggregate_stats(&keys, &model).await?;
    info!(
        status = pool_stats.status,
        used = pool_stats.total_used,
        remaining = pool_stats.total_remaining,
        "key pool after batch"
    );

    let merged = match cli.merge {
        Some(target) if report.failed() == 0 => {
            let files: Vec<PathBuf> = seqs.iter().map(|&seq| sink.wav_path(seq)).collect();
            let out = target.clone();
            tokio::task::spawn_blocking(move || wav::merge_wavs(&files, &out))
                .await
                .context("merge task failed")?
                .with_context(|| format!("failed to merge chunks into {}", target.display()))?;
            Some(target)
        }
        Some(target) => {
            warn!(path = %target.display(), "batch has failures, not merging chunks");
            None
        }
        None => None,
    };

    let summary = report_json(&report, &config.paths.output_dir, merged.as_deref());
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = cli.metrics_out {
        metrics::write_snapshot(&prometheus_handle, &path)
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }

    if report.failed() > 0 {
        warn!(failed = report.failed(), "batch finished with failures");
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Number chunks from 1 and disable the ones listed in `skip`.
fn build_units(chunks: Vec<String>, skip: &[u32]) -> error::Result<Vec<UnitOfWork>> {
    if chunks.is_empty() {
        return Err(error::Error::EmptyInput);
    }
    let skip: HashSet<u32> = skip.iter().copied().collect();
    Ok(chunks
        .into_iter()
        .zip(1u32..)
        .map(|(text, seq)| {
            let unit = UnitOfWork::new(seq, text);
            if skip.contains(&seq) {
                unit.disabled()
            } else {
                unit
            }
        })
        .collect())
}

async fn read_input(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path).await
    }
}

fn log_event(event: &BatchEvent, progress: &ProgressTracker) {
    match event {
        BatchEvent::Started { seq } => debug!(unit = seq, "unit started"),
        BatchEvent::Skipped { seq } => info!(unit = seq, "unit skipped"),
        BatchEvent::Finished(outcome) => {
            let stats = progress.stats();
            match &outcome.result {
                Ok(path) => info!(
                    unit = outcome.seq,
                    path = %path.display(),
                    progress = stats.percent,
                    eta = %stats.eta_display(),
                    "unit finished"
                ),
                Err(failure) => warn!(
                    unit = outcome.seq,
                    kind = failure.kind.label(),
                    error = %failure.summary,
                    progress = stats.percent,
                    "unit failed"
                ),
            }
        }
    }
}

/// Per-key and aggregate usage, keys redacted.
async fn stats_json(pool: &KeyPool, keys: &[String], model: &str) -> Result<serde_json::Value> {
    let mut per_key = Vec::with_capacity(keys.len());
    for key in keys {
        let stats = pool.stats_for(key, model).await?;
        per_key.push(serde_json::json!({
            "key": redact(key),
            "used": stats.used,
            "remaining": stats.remaining,
            "limit": stats.limit,
            "percent": stats.percent,
            "exhausted": stats.exhausted,
        }));
    }
    let aggregate = pool.aggregate_stats(keys, model).await?;
    Ok(serde_json::json!({
        "model": model,
        "keys": per_key,
        "aggregate": aggregate,
    }))
}

fn report_json(
    report: &BatchReport,
    output_dir: &Path,
    merged: Option<&Path>,
) -> serde_json::Value {
    let failures: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .filter_map(|o| {
            o.result.as_ref().err().map(|f| {
                serde_json::json!({
                    "unit": o.seq,
                    "kind": f.kind.label(),
                    "error": f.summary,
                })
            })
        })
        .collect();
    serde_json::json!({
        "batch_id": report.id.to_string(),
        "output_dir": output_dir.display().to_string(),
        "total": report.stats.total,
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "skipped": report.skipped,
        "elapsed": report.stats.elapsed_display(),
        "merged": merged.map(|p| p.display().to_string()),
        "failures": failures,
    })
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling"),
        _ = terminate => info!("received SIGTERM, cancelling"),
    }
}
