//! One source's chain: catalog, submit, poll, retrieve, assemble.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::catalog::TileCatalog;
use super::config::RunConfig;
use super::mosaic::{MosaicAssembler, MosaicProduct};
use super::poller::{TaskPoller, TaskStatus};
use super::retriever::{Artifact, ArtifactRetriever, FetchReport};
use super::submitter::{ClassificationJob, JobOutcome, JobSubmitter, SubmissionReport, SubmitParams};
use crate::raster::{RasterProcessor, NODATA};
use crate::remote::{BlobStore, ClassificationService};
use crate::source::{SourceKind, Tile};

/// Why a source produced no mosaic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceFailure {
    Disabled,
    CatalogUnavailable(String),
    NoTiles,
    ListingFailed(String),
    NoArtifacts,
    MosaicFailed(String),
    /// The source task panicked or was aborted.
    Panicked(String),
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFailure::Disabled => write!(f, "source disabled"),
            SourceFailure::CatalogUnavailable(e) => write!(f, "tile catalog unavailable: {}", e),
            SourceFailure::NoTiles => write!(f, "catalog returned no tiles"),
            SourceFailure::ListingFailed(e) => write!(f, "artifact listing failed: {}", e),
            SourceFailure::NoArtifacts => write!(f, "no completed artifacts to mosaic"),
            SourceFailure::MosaicFailed(e) => write!(f, "mosaic build failed: {}", e),
            SourceFailure::Panicked(e) => write!(f, "source task panicked: {}", e),
        }
    }
}

/// Per-tile record in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub tile: String,
    pub outcome: JobOutcome,
    pub attempts: u32,
    /// Terminal status, for submitted jobs.
    pub status: Option<TaskStatus>,
}

/// What one source pipeline did.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source: SourceKind,
    pub tiles: usize,
    pub submission: SubmissionReport,
    pub jobs: Vec<JobRecord>,
    pub resubmissions: usize,
    pub fetch: Option<FetchReport>,
    pub mosaic: Option<MosaicProduct>,
    pub failure: Option<SourceFailure>,
}

impl SourceRun {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            tiles: 0,
            submission: SubmissionReport::default(),
            jobs: Vec::new(),
            resubmissions: 0,
            fetch: None,
            mosaic: None,
            failure: None,
        }
    }

    pub fn failed(source: SourceKind, failure: SourceFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(source)
        }
    }

    pub fn is_success(&self) -> bool {
        self.mosaic.is_some()
    }

    pub fn completed_jobs(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == Some(TaskStatus::Completed))
            .count()
    }
}

/// Remote and raster collaborators shared by both sources.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn ClassificationService>,
    pub store: Arc<dyn BlobStore>,
    pub raster: Arc<dyn RasterProcessor>,
}

pub struct SourcePipeline {
    source: SourceKind,
    config: Arc<RunConfig>,
    collaborators: Collaborators,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SourcePipeline {
    pub fn new(source: SourceKind, config: Arc<RunConfig>, collaborators: Collaborators) -> Self {
        Self {
            source,
            config,
            collaborators,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Local path of this source's mosaic.
    pub fn mosaic_path(&self) -> PathBuf {
        self.config
            .mosaic_dir()
            .join(self.config.label.source_mosaic_name(self.source.label()))
    }

    fn submit_params(&self) -> SubmitParams {
        let source_config = self.config.source(self.source);
        SubmitParams {
            window: self.config.window,
            cloud_cover: source_config.cloud_cover,
            labels: self.config.training_labels.clone(),
            label: self.config.label,
            export_folder: source_config.export_folder.clone(),
            scale: self.config.fine_cell_size,
            crs: self.config.export_crs.clone(),
        }
    }

    fn poller(&self) -> TaskPoller {
        let poller = TaskPoller::new(self.collaborators.service.clone(), self.config.poll.clone());
        match self.shutdown {
            Some(ref rx) => poller.with_shutdown(rx.clone()),
            None => poller,
        }
    }

    /// Runs the chain. Failures are recorded in the returned value.
    pub async fn run(self) -> SourceRun {
        let source = self.source;
        let source_config = self.config.source(source).clone();
        let mut run = SourceRun::new(source);
        if !source_config.enabled {
            info!(source = %source, "Source disabled");
            run.failure = Some(SourceFailure::Disabled);
            return run;
        }

        let catalog = TileCatalog::new(self.collaborators.service.clone());
        let tiles = match catalog
            .enumerate(
                source,
                &self.config.region,
                &self.config.catalog_window,
                source_config.max_tiles,
            )
            .await
        {
            Ok(tiles) => tiles,
            Err(e) => {
                error!(source = %source, error = %e, "Tile catalog failed");
                run.failure = Some(SourceFailure::CatalogUnavailable(e.to_string()));
                return run;
            }
        };
        run.tiles = tiles.len();
        if tiles.is_empty() {
            warn!(source = %source, "No tiles to process");
            run.failure = Some(SourceFailure::NoTiles);
            return run;
        }

        let params = self.submit_params();
        let submitter = JobSubmitter::new(
            self.collaborators.service.clone(),
            self.config.submit_concurrency,
        );
        let (mut jobs, submission) = submitter.submit_all(&tiles, &params).await;
        run.submission = submission;

        let poller = self.poller();
        let mut statuses = poller.poll_until_terminal(&jobs).await;
        run.resubmissions = self
            .resubmit_failed(&submitter, &poller, &params, &mut jobs, &mut statuses)
            .await;
        run.jobs = job_records(&jobs, &statuses);

        let retriever = ArtifactRetriever::new(
            self.collaborators.store.clone(),
            self.config.retrieve.clone(),
        );
        let local_dir = self.config.tile_dir(source);
        let fetch = match retriever
            .fetch(source, &source_config.export_folder, &local_dir)
            .await
        {
            Ok(fetch) => fetch,
            Err(e) => {
                error!(source = %source, error = %e, "Artifact retrieval failed");
                run.failure = Some(SourceFailure::ListingFailed(e.to_string()));
                return run;
            }
        };

        let artifacts = self.completed_artifacts(&fetch, &statuses);
        run.fetch = Some(fetch);
        if artifacts.is_empty() {
            warn!(source = %source, "No completed artifacts");
            run.failure = Some(SourceFailure::NoArtifacts);
            return run;
        }

        let assembler = MosaicAssembler::new(self.collaborators.raster.clone(), NODATA);
        match assembler.assemble(&artifacts, &self.mosaic_path()).await {
            Ok(product) => run.mosaic = Some(product),
            Err(e) => {
                error!(source = %source, error = %e, "Source mosaic failed");
                run.failure = Some(SourceFailure::MosaicFailed(e.to_string()));
            }
        }
        run
    }

    /// Resubmits jobs in a retryable terminal state, up to the configured
    /// number of rounds. No round starts once shutdown was signalled.
    /// Returns the number of resubmissions made.
    async fn resubmit_failed(
        &self,
        submitter: &JobSubmitter,
        poller: &TaskPoller,
        params: &SubmitParams,
        jobs: &mut [ClassificationJob],
        statuses: &mut BTreeMap<Tile, TaskStatus>,
    ) -> usize {
        let mut resubmitted = 0usize;
        for round in 1..=self.config.max_resubmissions {
            if self.shutdown_requested() {
                info!(source = %self.source, "Shutdown requested, not resubmitting");
                break;
            }
            let retry: Vec<usize> = jobs
                .iter()
                .enumerate()
                .filter(|(_, job)| statuses.get(&job.tile).is_some_and(|s| s.is_retryable()))
                .map(|(i, _)| i)
                .collect();
            if retry.is_empty() {
                break;
            }
            info!(source = %self.source, round = round, jobs = retry.len(), "Resubmitting jobs");

            let mut retried = Vec::with_capacity(retry.len());
            for &i in &retry {
                let mut job = submitter.submit(&jobs[i].tile, params).await;
                job.attempts = jobs[i].attempts + 1;
                if matches!(job.outcome, JobOutcome::Submitted(_)) {
                    resubmitted += 1;
                    jobs[i] = job.clone();
                    retried.push(job);
                } else {
                    // Keep the earlier terminal status.
                    jobs[i].attempts = job.attempts;
                }
            }

            let new_statuses = poller.poll_until_terminal(&retried).await;
            statuses.extend(new_statuses);
        }
        resubmitted
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fetched artifacts of completed tiles whose name carries this run's
    /// export description.
    fn completed_artifacts(
        &self,
        fetch: &FetchReport,
        statuses: &BTreeMap<Tile, TaskStatus>,
    ) -> Vec<Artifact> {
        fetch
            .artifacts()
            .into_iter()
            .filter(|artifact| {
                let tile = Tile::new(self.source, artifact.tile.clone());
                let completed = statuses.get(&tile) == Some(&TaskStatus::Completed);
                let description = self
                    .config
                    .label
                    .export_description(&artifact.tile.to_string(), self.config.window.end);
                let current = artifact
                    .path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&description));
                if !completed || !current {
                    info!(
                        source = %self.source,
                        artifact = %artifact.path.display(),
                        "Dropping artifact without a completed job in this run"
                    );
                }
                completed && current
            })
            .collect()
    }
}

fn job_records(jobs: &[ClassificationJob], statuses: &BTreeMap<Tile, TaskStatus>) -> Vec<JobRecord> {
    jobs.iter()
        .map(|job| JobRecord {
            tile: job.tile.key.to_string(),
            outcome: job.outcome.clone(),
            attempts: job.attempts,
            status: statuses.get(&job.tile).cloned(),
        })
        .collect()
}
