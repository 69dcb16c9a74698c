//! Run coordinator.
//!
//! Runs the two source pipelines as supervised tasks, joins them, then drives
//! the post-processing chain on whatever survived: cross-source merge, clip,
//! resample, format conversion and cleanup. Every stage is recorded in the
//! [`RunReport`]; a failed stage never stops later stages from attempting to
//! run on the inputs that exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::config::RunConfig;
use super::mosaic::{MosaicAssembler, MosaicProduct};
use super::source_pipeline::{Collaborators, SourceFailure, SourcePipeline, SourceRun};
use crate::error::RunError;
use crate::metrics::MetricsCollector;
use crate::raster::{RasterFormat, NODATA};
use crate::source::{DateWindow, SourceKind};

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }

    fn label(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed(_) => "failed",
            StageStatus::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    #[serde(flatten)]
    pub status: StageStatus,
    pub duration_secs: f64,
}

/// Everything one run did, written to `run-report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub label: String,
    pub window: DateWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when a shutdown signal or the run deadline cut polling short.
    pub cancelled: bool,
    pub sources: Vec<SourceRun>,
    pub stages: Vec<StageOutcome>,
    /// Final products written to the output directory.
    pub products: Vec<PathBuf>,
}

impl RunReport {
    fn new(config: &RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            label: config.label.prefix(),
            window: config.window,
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            sources: Vec::new(),
            stages: Vec::new(),
            products: Vec::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn source(&self, source: SourceKind) -> Option<&SourceRun> {
        self.sources.iter().find(|s| s.source == source)
    }

    fn stage_succeeded(&self, name: &str) -> bool {
        self.stage(name).is_some_and(|s| s.status.is_success())
    }

    /// True iff the combined product was built, clipped and converted to
    /// the fine-resolution deliverable.
    pub fn is_success(&self) -> bool {
        self.stage_succeeded(STAGE_MERGE)
            && self.stage_succeeded(STAGE_CLIP)
            && self.stage_succeeded(STAGE_CONVERT_FINE)
    }

    /// The run-fatal error, if the run failed.
    pub fn error(&self) -> Option<RunError> {
        if self.is_success() {
            return None;
        }
        if !self.sources.iter().any(SourceRun::is_success) {
            Some(RunError::NoSourceMosaic)
        } else if self.cancelled {
            Some(RunError::Cancelled)
        } else {
            // A failed source is not fatal while the other one succeeded.
            let reason = self
                .stages
                .iter()
                .filter(|s| !SourceKind::ALL.iter().any(|k| k.to_string() == s.stage))
                .find_map(|s| match s.status {
                    StageStatus::Failed(ref msg) => Some(format!("{}: {}", s.stage, msg)),
                    _ => None,
                })
                .unwrap_or_else(|| "combined product not produced".to_string());
            Some(RunError::StageFailed(reason))
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), RunError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

const STAGE_MERGE: &str = "merge";
const STAGE_CLIP: &str = "clip";
const STAGE_CONVERT_FINE: &str = "convert_fine";
const STAGE_RESAMPLE: &str = "resample";
const STAGE_CONVERT_COARSE: &str = "convert_coarse";
const STAGE_CLEANUP_LOCAL: &str = "cleanup_local";
const STAGE_CLEANUP_REMOTE: &str = "cleanup_remote";

pub const REPORT_FILE: &str = "run-report.json";

pub struct PipelineCoordinator {
    config: Arc<RunConfig>,
    collaborators: Collaborators,
    shutdown: Option<watch::Receiver<bool>>,
    metrics: MetricsCollector,
}

impl PipelineCoordinator {
    pub fn new(config: RunConfig, collaborators: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            shutdown: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Cancels pending remote jobs when `true` is sent.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs every stage and writes the report. Only an invalid configuration
    /// is returned as an error; stage failures are recorded in the report.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        self.config.validate()?;
        let mut report = RunReport::new(&self.config);
        info!(
            run_id = %report.run_id,
            label = %report.label,
            window = %report.window,
            "Starting mapping run"
        );

        self.run_sources(&mut report).await;
        let combined = self.merge(&mut report).await;
        self.post_process(&mut report, combined.as_ref()).await;
        self.cleanup_local(&mut report).await;
        self.cleanup_remote(&mut report).await;

        report.finished_at = Some(Utc::now());
        let report_path = self.config.output_dir.join(REPORT_FILE);
        if let Err(e) = report.write(&report_path) {
            warn!(path = %report_path.display(), error = %e, "Failed to write run report");
        }

        match report.error() {
            None => info!(run_id = %report.run_id, products = report.products.len(), "Run succeeded"),
            Some(ref e) => error!(run_id = %report.run_id, error = %e, "Run failed"),
        }
        Ok(report)
    }

    fn record(&self, report: &mut RunReport, stage: &str, started: Instant, status: StageStatus) {
        let duration = started.elapsed();
        match status {
            StageStatus::Succeeded => info!(stage = stage, elapsed = ?duration, "Stage succeeded"),
            StageStatus::Failed(ref msg) => error!(stage = stage, error = %msg, "Stage failed"),
            StageStatus::Skipped(ref reason) => info!(stage = stage, reason = %reason, "Stage skipped"),
        }
        self.metrics
            .record_stage(stage, status.label(), duration.as_secs_f64());
        report.stages.push(StageOutcome {
            stage: stage.to_string(),
            status,
            duration_secs: duration.as_secs_f64(),
        });
    }

    /// Runs both source pipelines concurrently and joins them. The run
    /// deadline and the shutdown signal stop polling in both; work already
    /// past polling (downloads, mosaics) runs to completion.
    async fn run_sources(&self, report: &mut RunReport) {
        let started = Instant::now();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handles: Vec<_> = SourceKind::ALL
            .into_iter()
            .map(|source| {
                let pipeline = SourcePipeline::new(
                    source,
                    self.config.clone(),
                    self.collaborators.clone(),
                )
                .with_shutdown(stop_rx.clone());
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let run = pipeline.run().await;
                    (run, started.elapsed())
                });
                (source, handle)
            })
            .collect();

        let joined = futures::future::join_all(
            handles
                .into_iter()
                .map(|(source, handle)| async move { (source, handle.await) }),
        );
        tokio::pin!(joined);

        let deadline = self.config.run_timeout;
        let results = tokio::select! {
            results = &mut joined => results,
            _ = sleep_or_forever(deadline) => {
                warn!(timeout = ?deadline, "Run deadline reached, cancelling pending jobs");
                report.cancelled = true;
                let _ = stop_tx.send(true);
                joined.await
            }
            _ = shutdown_requested(self.shutdown.clone()) => {
                warn!("Shutdown requested, cancelling pending jobs");
                report.cancelled = true;
                let _ = stop_tx.send(true);
                joined.await
            }
        };

        for (source, result) in results {
            let (run, elapsed) = match result {
                Ok(done) => done,
                Err(e) => {
                    error!(source = %source, error = %e, "Source pipeline task failed");
                    (
                        SourceRun::failed(source, SourceFailure::Panicked(e.to_string())),
                        started.elapsed(),
                    )
                }
            };
            let status = match (&run.mosaic, &run.failure) {
                (Some(_), _) => StageStatus::Succeeded,
                (None, Some(SourceFailure::Disabled)) => StageStatus::Skipped("source disabled".into()),
                (None, Some(failure)) => StageStatus::Failed(failure.to_string()),
                (None, None) => StageStatus::Failed("no mosaic produced".into()),
            };
            let stage = source.to_string();
            self.metrics
                .record_stage(&stage, status.label(), elapsed.as_secs_f64());
            match status {
                StageStatus::Failed(ref msg) => error!(stage = %stage, error = %msg, "Stage failed"),
                _ => info!(stage = %stage, status = status.label(), tiles = run.tiles, "Source finished"),
            }
            report.stages.push(StageOutcome {
                stage,
                status,
                duration_secs: elapsed.as_secs_f64(),
            });
            report.sources.push(run);
        }
    }

    /// Merges the source mosaics in source order, so Sentinel values win
    /// over Landsat wherever Sentinel has data.
    async fn merge(&self, report: &mut RunReport) -> Option<MosaicProduct> {
        let started = Instant::now();
        let mosaics: Vec<MosaicProduct> = SourceKind::ALL
            .into_iter()
            .filter_map(|source| report.source(source).and_then(|r| r.mosaic.clone()))
            .collect();
        if mosaics.is_empty() {
            self.record(
                report,
                STAGE_MERGE,
                started,
                StageStatus::Failed(RunError::NoSourceMosaic.to_string()),
            );
            return None;
        }

        let output = self
            .config
            .mosaic_dir()
            .join(self.config.label.combined_mosaic_name());
        let assembler = MosaicAssembler::new(self.collaborators.raster.clone(), NODATA)
            .with_palette(self.config.palette.clone());
        match assembler.merge_sources(&mosaics, &output).await {
            Ok(product) => {
                self.record(report, STAGE_MERGE, started, StageStatus::Succeeded);
                Some(product)
            }
            Err(e) => {
                self.record(report, STAGE_MERGE, started, StageStatus::Failed(e.to_string()));
                None
            }
        }
    }

    /// Clip, then the fine conversion and the coarse resample/convert pair.
    async fn post_process(&self, report: &mut RunReport, combined: Option<&MosaicProduct>) {
        let raster = self.collaborators.raster.clone();
        let output_dir = &self.config.output_dir;
        let label = self.config.label;
        let fine = self.config.fine_cell_size;
        let coarse = self.config.coarse_cell_size;

        let started = Instant::now();
        let clipped = match combined {
            None => {
                self.record(report, STAGE_CLIP, started, skipped("no combined mosaic"));
                None
            }
            Some(combined) => {
                let output = output_dir.join(label.product_name(fine, RasterFormat::GeoTiff.extension()));
                let result = match tokio::fs::create_dir_all(output_dir).await {
                    Ok(()) => raster
                        .clip(&combined.path, &self.config.clip_boundary, NODATA, &output)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                self.finish_product(report, STAGE_CLIP, started, result, output)
            }
        };

        let started = Instant::now();
        match clipped {
            None => self.record(report, STAGE_CONVERT_FINE, started, skipped("no clipped product")),
            Some(ref input) => {
                let output =
                    output_dir.join(label.product_name(fine, RasterFormat::ErdasImagine.extension()));
                let result = raster
                    .convert(input, RasterFormat::ErdasImagine, &output)
                    .await
                    .map_err(|e| e.to_string());
                self.finish_product(report, STAGE_CONVERT_FINE, started, result, output);
            }
        }

        let started = Instant::now();
        let resampled = match clipped {
            None => {
                self.record(report, STAGE_RESAMPLE, started, skipped("no clipped product"));
                None
            }
            Some(ref input) => {
                let output =
                    output_dir.join(label.product_name(coarse, RasterFormat::GeoTiff.extension()));
                let result = raster
                    .resample(input, f64::from(coarse), RasterFormat::GeoTiff, &output)
                    .await
                    .map_err(|e| e.to_string());
                self.finish_product(report, STAGE_RESAMPLE, started, result, output)
            }
        };

        let started = Instant::now();
        match resampled {
            None => self.record(report, STAGE_CONVERT_COARSE, started, skipped("no coarse product")),
            Some(ref input) => {
                let output = output_dir
                    .join(label.product_name(coarse, RasterFormat::ErdasImagine.extension()));
                let result = raster
                    .convert(input, RasterFormat::ErdasImagine, &output)
                    .await
                    .map_err(|e| e.to_string());
                self.finish_product(report, STAGE_CONVERT_COARSE, started, result, output);
            }
        }
    }

    fn finish_product(
        &self,
        report: &mut RunReport,
        stage: &str,
        started: Instant,
        result: Result<(), String>,
        output: PathBuf,
    ) -> Option<PathBuf> {
        match result {
            Ok(()) => {
                info!(stage = stage, product = %output.display(), "Wrote product");
                self.record(report, stage, started, StageStatus::Succeeded);
                report.products.push(output.clone());
                Some(output)
            }
            Err(msg) => {
                self.record(report, stage, started, StageStatus::Failed(msg));
                None
            }
        }
    }

    /// Removes downloaded tiles and intermediate mosaics.
    async fn cleanup_local(&self, report: &mut RunReport) {
        let started = Instant::now();
        if self.config.keep_intermediates {
            self.record(report, STAGE_CLEANUP_LOCAL, started, skipped("keep_intermediates set"));
            return;
        }

        let mut dirs: Vec<PathBuf> = SourceKind::ALL
            .into_iter()
            .map(|source| self.config.tile_dir(source))
            .collect();
        dirs.push(self.config.mosaic_dir());

        let mut errors = Vec::new();
        for dir in dirs {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!(dir = %dir.display(), "Removed intermediate files"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => errors.push(format!("{}: {}", dir.display(), e)),
            }
        }
        let status = if errors.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed(errors.join("; "))
        };
        self.record(report, STAGE_CLEANUP_LOCAL, started, status);
    }

    /// Deletes the remote export folders after the grace period.
    async fn cleanup_remote(&self, report: &mut RunReport) {
        let started = Instant::now();
        if !self.config.cleanup_remote {
            self.record(report, STAGE_CLEANUP_REMOTE, started, skipped("remote cleanup disabled"));
            return;
        }

        if !self.config.grace_period.is_zero() {
            info!(grace = ?self.config.grace_period, "Waiting before remote cleanup");
            tokio::time::sleep(self.config.grace_period).await;
        }

        let mut errors = Vec::new();
        for source in SourceKind::ALL {
            let source_config = self.config.source(source);
            if !source_config.enabled {
                continue;
            }
            match self
                .collaborators
                .store
                .delete_folder(&source_config.export_folder)
                .await
            {
                Ok(deleted) => info!(
                    source = %source,
                    folder = %source_config.export_folder,
                    deleted = deleted,
                    "Deleted remote exports"
                ),
                Err(e) => errors.push(format!("{}: {}", source_config.export_folder, e)),
            }
        }
        let status = if errors.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed(errors.join("; "))
        };
        self.record(report, STAGE_CLEANUP_REMOTE, started, status);
    }
}

fn skipped(reason: &str) -> StageStatus {
    StageStatus::Skipped(reason.to_string())
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Resolves once `true` is sent. A dropped sender never resolves.
async fn shutdown_requested(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedService;
    use crate::raster::GridRaster;
    use crate::remote::LocalBlobStore;
    use chrono::NaiveDate;

    fn coordinator(root: &Path) -> PipelineCoordinator {
        let config = RunConfig::for_run_date(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
            .unwrap()
            .with_work_dir(root.join("work"))
            .with_output_dir(root.join("out"))
            .with_grace_period(Duration::ZERO);
        PipelineCoordinator::new(
            config,
            Collaborators {
                service: Arc::new(ScriptedService::new()),
                store: Arc::new(LocalBlobStore::new(root.join("blobs"))),
                raster: Arc::new(GridRaster::new()),
            },
        )
    }

    #[tokio::test]
    async fn test_both_catalogs_down_is_run_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
        let report = coordinator(dir.path()).run().await.unwrap();

        assert!(!report.is_success());
        assert!(matches!(report.error(), Some(RunError::NoSourceMosaic)));
        assert_eq!(report.sources.len(), 2);
        assert!(matches!(
            report.stage("merge").map(|s| &s.status),
            Some(StageStatus::Failed(_))
        ));
        assert!(matches!(
            report.stage("clip").map(|s| &s.status),
            Some(StageStatus::Skipped(_))
        ));
        // Cleanup still runs after a fatal merge.
        assert_eq!(
            report.stage("cleanup_remote").map(|s| &s.status),
            Some(&StageStatus::Succeeded)
        );
        assert!(dir.path().join("out").join(REPORT_FILE).exists());
        assert!(report.products.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator(dir.path());
        Arc::make_mut(&mut coordinator.config).submit_concurrency = 0;
        assert!(matches!(coordinator.run().await, Err(RunError::Config(_))));
    }

    #[tokio::test]
    async fn test_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
        let report = coordinator(dir.path()).run().await.unwrap();
        let stages: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            stages,
            vec![
                "landsat",
                "sentinel",
                "merge",
                "clip",
                "convert_fine",
                "resample",
                "convert_coarse",
                "cleanup_local",
                "cleanup_remote",
            ]
        );
    }

    #[test]
    fn test_stage_outcome_serialization() {
        let outcome = StageOutcome {
            stage: "clip".to_string(),
            status: StageStatus::Failed("disk full".to_string()),
            duration_secs: 1.5,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stage"], "clip");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["detail"], "disk full");
    }
}
