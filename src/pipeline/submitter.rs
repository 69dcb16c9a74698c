//! Per-tile classification job submission.
//!
//! Every tile goes through composite, sample and submit. A tile whose
//! footprint is empty or whose sample cannot train a classifier becomes a
//! skip outcome, and any service error becomes `SubmissionFailed`. Nothing a
//! single tile does can abort the rest of the batch.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::remote::{ClassificationService, ExportTarget, JobHandle};
use crate::source::{DateWindow, RunLabel, Tile, TrainingLabels};

/// Outcome of submitting one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Submitted(JobHandle),
    /// Sample empty or single-class.
    SkippedNoTrainingData,
    /// Composite footprint has zero area.
    SkippedEmptyGeometry,
    SubmissionFailed(String),
}

impl JobOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            JobOutcome::SkippedNoTrainingData | JobOutcome::SkippedEmptyGeometry
        )
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Submitted(_) => write!(f, "submitted"),
            JobOutcome::SkippedNoTrainingData => write!(f, "skipped_no_training_data"),
            JobOutcome::SkippedEmptyGeometry => write!(f, "skipped_empty_geometry"),
            JobOutcome::SubmissionFailed(_) => write!(f, "submission_failed"),
        }
    }
}

/// One tile's remote work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationJob {
    pub tile: Tile,
    pub outcome: JobOutcome,
    /// Submission attempts made for this tile, including resubmissions.
    pub attempts: u32,
}

impl ClassificationJob {
    /// The remote handle, present only for submitted jobs.
    pub fn handle(&self) -> Option<&JobHandle> {
        match self.outcome {
            JobOutcome::Submitted(ref handle) => Some(handle),
            _ => None,
        }
    }
}

/// Everything a submission needs besides the tile.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub window: DateWindow,
    pub cloud_cover: f64,
    pub labels: TrainingLabels,
    pub label: RunLabel,
    pub export_folder: String,
    pub scale: u32,
    pub crs: String,
}

impl SubmitParams {
    pub fn export_target(&self, tile: &Tile) -> ExportTarget {
        ExportTarget {
            folder: self.export_folder.clone(),
            description: self
                .label
                .export_description(&tile.key.to_string(), self.window.end),
            scale: self.scale,
            crs: self.crs.clone(),
        }
    }
}

/// Counts of submission outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub submitted: usize,
    pub skipped_no_training_data: usize,
    pub skipped_empty_geometry: usize,
    pub failed: usize,
}

impl SubmissionReport {
    pub fn from_jobs(jobs: &[ClassificationJob]) -> Self {
        let mut report = Self::default();
        for job in jobs {
            report.record(&job.outcome);
        }
        report
    }

    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Submitted(_) => self.submitted += 1,
            JobOutcome::SkippedNoTrainingData => self.skipped_no_training_data += 1,
            JobOutcome::SkippedEmptyGeometry => self.skipped_empty_geometry += 1,
            JobOutcome::SubmissionFailed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.submitted + self.skipped_no_training_data + self.skipped_empty_geometry + self.failed
    }
}

pub struct JobSubmitter {
    service: Arc<dyn ClassificationService>,
    concurrency_limiter: Arc<Semaphore>,
    metrics: MetricsCollector,
}

impl JobSubmitter {
    pub fn new(service: Arc<dyn ClassificationService>, concurrency: usize) -> Self {
        Self {
            service,
            concurrency_limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            metrics: MetricsCollector::new(),
        }
    }

    /// Submits one tile. Never fails; errors become `SubmissionFailed`.
    pub async fn submit(&self, tile: &Tile, params: &SubmitParams) -> ClassificationJob {
        let outcome = match self.concurrency_limiter.acquire().await {
            Ok(_permit) => self.try_submit(tile, params).await,
            Err(e) => JobOutcome::SubmissionFailed(format!("submitter closed: {}", e)),
        };

        match outcome {
            JobOutcome::Submitted(ref handle) => {
                debug!(tile = %tile, job = %handle, "Submitted classification job")
            }
            JobOutcome::SubmissionFailed(ref reason) => {
                warn!(tile = %tile, error = %reason, "Tile submission failed")
            }
            ref skipped => info!(tile = %tile, outcome = %skipped, "Tile skipped"),
        }
        self.metrics
            .record_tile(&tile.source.to_string(), &outcome.to_string());

        ClassificationJob {
            tile: tile.clone(),
            outcome,
            attempts: 1,
        }
    }

    async fn try_submit(&self, tile: &Tile, params: &SubmitParams) -> JobOutcome {
        let composite = match self
            .service
            .composite(tile, &params.window, params.cloud_cover)
            .await
        {
            Ok(composite) => composite,
            Err(e) => return JobOutcome::SubmissionFailed(e.to_string()),
        };
        if !composite.has_footprint() {
            return JobOutcome::SkippedEmptyGeometry;
        }

        let sample = match self.service.training_sample(&composite, &params.labels).await {
            Ok(sample) => sample,
            Err(e) => return JobOutcome::SubmissionFailed(e.to_string()),
        };
        if !sample.is_usable() {
            debug!(
                tile = %tile,
                points = sample.total(),
                classes = sample.distinct_classes(),
                "Training sample unusable"
            );
            return JobOutcome::SkippedNoTrainingData;
        }

        let target = params.export_target(tile);
        match self.service.submit(&composite, &sample, &target).await {
            Ok(handle) => JobOutcome::Submitted(handle),
            Err(e) => JobOutcome::SubmissionFailed(e.to_string()),
        }
    }

    /// Submits every tile, at most `concurrency` at a time. Results keep the
    /// order of `tiles`.
    pub async fn submit_all(
        &self,
        tiles: &[Tile],
        params: &SubmitParams,
    ) -> (Vec<ClassificationJob>, SubmissionReport) {
        let futures: Vec<_> = tiles.iter().map(|tile| self.submit(tile, params)).collect();
        let jobs = futures::future::join_all(futures).await;
        let report = SubmissionReport::from_jobs(&jobs);

        if let Some(source) = tiles.first().map(|t| t.source) {
            info!(
                source = %source,
                submitted = report.submitted,
                no_training_data = report.skipped_no_training_data,
                empty_geometry = report.skipped_empty_geometry,
                failed = report.failed,
                "Submission finished"
            );
        }
        (jobs, report)
    }
}
