//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` facade:
//!
//! - `pool_selections_total` (counter): label `result`
//! - `pool_key_errors_total` (counter): label `kind`
//! - `batch_units_total` (counter): label `outcome`
//! - `batch_unit_duration_seconds` (histogram): label `outcome`
//! - `batch_retries_total` (counter): label `reason`
//!
//! A batch is a one-shot process, so instead of serving `/metrics` the
//! rendered exposition is written to a file at the end of the run.

use std::path::Path;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Unit durations range from a couple of seconds to several minutes of
/// retries and spacing waits.
const UNIT_DURATION_BUCKETS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("batch_unit_duration_seconds".to_string()),
            UNIT_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Write the Prometheus text exposition to `path`.
pub async fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    tokio::fs::write(path, handle.render()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; `install_recorder()` may only run once
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn unit_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        batch_runner::metrics::record_unit("completed", 4.2);
        batch_runner::metrics::record_unit("retries_exhausted", 31.0);
        batch_runner::metrics::record_retry("HttpError");

        let output = handle.render();
        assert!(output.contains("batch_units_total"));
        assert!(output.contains("outcome=\"completed\""));
        assert!(output.contains("outcome=\"retries_exhausted\""));
        assert!(
            output.contains("batch_unit_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("batch_retries_total"));
        assert!(output.contains("reason=\"HttpError\""));
    }

    #[test]
    fn empty_recorder_renders_without_batch_metrics() {
        let (_recorder, handle) = isolated_recorder();
        let output = handle.render();
        assert!(!output.contains("batch_units_total"));
    }

    #[tokio::test]
    async fn snapshot_is_written_to_file() {
        let (recorder, handle) = isolated_recorder();
        {
            let _guard = metrics::set_default_local_recorder(&recorder);
            batch_runner::metrics::record_retry("DecodeError");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write_snapshot(&handle, &path).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("batch_retries_total"));
    }
}
