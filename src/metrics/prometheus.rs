//! Prometheus metrics registration and export.
//!
//! Defines every metric the mapping pipeline records and the functions for
//! initializing and exporting them.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all pipeline metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tiles processed by the submitter, labeled by source and outcome.
pub static TILES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs reaching a terminal status, labeled by source and status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs still pending after the latest sweep, labeled by source.
pub static JOBS_PENDING: OnceLock<GaugeVec> = OnceLock::new();

/// Poll sweeps performed, labeled by source.
pub static POLL_SWEEPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Artifact downloads, labeled by source and result.
pub static DOWNLOADS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Downloaded bytes, labeled by source.
pub static DOWNLOAD_BYTES: OnceLock<CounterVec> = OnceLock::new();

/// Coordinator stages, labeled by stage and status.
pub static STAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Coordinator stage duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let tiles_total = CounterVec::new(
        Opts::new("inseason_tiles_total", "Tiles processed by the job submitter"),
        &["source", "outcome"],
    )?;

    let jobs_total = CounterVec::new(
        Opts::new("inseason_jobs_total", "Classification jobs reaching a terminal status"),
        &["source", "status"],
    )?;

    let jobs_pending = GaugeVec::new(
        Opts::new("inseason_jobs_pending", "Jobs still pending after the latest sweep"),
        &["source"],
    )?;

    let poll_sweeps_total = CounterVec::new(
        Opts::new("inseason_poll_sweeps_total", "Status sweeps performed"),
        &["source"],
    )?;

    let downloads_total = CounterVec::new(
        Opts::new("inseason_downloads_total", "Artifact downloads"),
        &["source", "result"],
    )?;

    let download_bytes = CounterVec::new(
        Opts::new("inseason_download_bytes_total", "Bytes downloaded"),
        &["source"],
    )?;

    let stages_total = CounterVec::new(
        Opts::new("inseason_stages_total", "Coordinator stages by status"),
        &["stage", "status"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "inseason_stage_duration_seconds",
            "Coordinator stage duration in seconds",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0, 43200.0]),
        &["stage"],
    )?;

    registry.register(Box::new(tiles_total.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(jobs_pending.clone()))?;
    registry.register(Box::new(poll_sweeps_total.clone()))?;
    registry.register(Box::new(downloads_total.clone()))?;
    registry.register(Box::new(download_bytes.clone()))?;
    registry.register(Box::new(stages_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = TILES_TOTAL.set(tiles_total);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOBS_PENDING.set(jobs_pending);
    let _ = POLL_SWEEPS_TOTAL.set(poll_sweeps_total);
    let _ = DOWNLOADS_TOTAL.set(downloads_total);
    let _ = DOWNLOAD_BYTES.set(download_bytes);
    let _ = STAGES_TOTAL.set(stages_total);
    let _ = STAGE_DURATION.set(stage_duration);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the text exposition to `path`, for node-exporter textfile scraping.
pub fn write_metrics_file(path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, export_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(stages) = STAGES_TOTAL.get() {
            stages.with_label_values(&["merge", "succeeded"]).inc();
        }
        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("inseason_stages_total"));
    }

    #[test]
    fn test_write_metrics_file() {
        let _ = init_metrics();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile").join("inseason.prom");
        write_metrics_file(&path).unwrap();
        assert!(path.exists());
    }
}
