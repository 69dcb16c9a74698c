//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! can record unconditionally.

use super::prometheus::{
    DOWNLOADS_TOTAL, DOWNLOAD_BYTES, JOBS_PENDING, JOBS_TOTAL, POLL_SWEEPS_TOTAL, STAGES_TOTAL,
    STAGE_DURATION, TILES_TOTAL,
};

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one tile's submission outcome (`submitted`, `skipped_no_training_data`, ...).
    pub fn record_tile(&self, source: &str, outcome: &str) {
        if let Some(tiles_total) = TILES_TOTAL.get() {
            tiles_total.with_label_values(&[source, outcome]).inc();
        }
        tracing::trace!(source = source, outcome = outcome, "Recorded tile metric");
    }

    /// Record a job reaching a terminal status.
    pub fn record_job(&self, source: &str, status: &str) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[source, status]).inc();
        }
    }

    /// Record one poll sweep and the number of jobs left pending after it.
    pub fn record_sweep(&self, source: &str, pending: usize) {
        if let Some(sweeps) = POLL_SWEEPS_TOTAL.get() {
            sweeps.with_label_values(&[source]).inc();
        }
        if let Some(gauge) = JOBS_PENDING.get() {
            gauge.with_label_values(&[source]).set(pending as f64);
        }
    }

    /// Record a download attempt. `result` is `downloaded`, `reused` or `failed`.
    pub fn record_download(&self, source: &str, result: &str, bytes: u64) {
        if let Some(downloads) = DOWNLOADS_TOTAL.get() {
            downloads.with_label_values(&[source, result]).inc();
        }
        if bytes > 0 {
            if let Some(total) = DOWNLOAD_BYTES.get() {
                total.with_label_values(&[source]).inc_by(bytes as f64);
            }
        }
    }

    /// Record a coordinator stage result.
    pub fn record_stage(&self, stage: &str, status: &str, duration_secs: f64) {
        if let Some(stages) = STAGES_TOTAL.get() {
            stages.with_label_values(&[stage, status]).inc();
        }
        if let Some(duration) = STAGE_DURATION.get() {
            duration.with_label_values(&[stage]).observe(duration_secs);
        }
        tracing::trace!(
            stage = stage,
            status = status,
            duration_secs = duration_secs,
            "Recorded stage metric"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    #[test]
    fn test_collector_records_without_panicking() {
        let collector = MetricsCollector::new();
        // Before and after init.
        collector.record_tile("landsat", "submitted");
        let _ = init_metrics();
        collector.record_tile("landsat", "submitted");
        collector.record_job("sentinel", "completed");
        collector.record_sweep("sentinel", 3);
        collector.record_download("landsat", "downloaded", 1024);
        collector.record_stage("clip", "failed", 2.5);
    }

    #[test]
    fn test_tile_counter_increments() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        let before = TILES_TOTAL
            .get()
            .map(|c| c.with_label_values(&["test_source", "submitted"]).get())
            .unwrap_or(0.0);
        collector.record_tile("test_source", "submitted");
        let after = TILES_TOTAL
            .get()
            .map(|c| c.with_label_values(&["test_source", "submitted"]).get())
            .unwrap_or(0.0);
        assert!((after - before - 1.0).abs() < f64::EPSILON);
    }
}
