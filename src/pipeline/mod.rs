//! In-season mapping pipeline.
//!
//! # Architecture
//!
//! Each imagery source runs its own chain of components:
//!
//! - **Catalog**: enumerates the tiles covering the region
//! - **Submitter**: builds composites and training samples and submits one
//!   classification job per tile
//! - **Poller**: sweeps job status until every job is terminal
//! - **Retriever**: downloads the exported tile rasters
//! - **Mosaic**: merges the tiles into one source mosaic
//!
//! The [`PipelineCoordinator`] runs both source chains concurrently, merges
//! their mosaics and drives the clip, resample and conversion stages.
//!
//! # Example
//!
//! ```rust,ignore
//! use inseason_mapper::pipeline::{Collaborators, PipelineCoordinator, RunConfig};
//!
//! let config = RunConfig::for_run_date(today)?.with_output_dir("./output");
//! let coordinator = PipelineCoordinator::new(config, collaborators);
//! let report = coordinator.run().await?;
//! println!("success: {}", report.is_success());
//! ```

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod mosaic;
pub mod poller;
pub mod retriever;
pub mod source_pipeline;
pub mod submitter;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::TileCatalog;
pub use config::{ConfigError, PollConfig, RetrieveConfig, RunConfig, SourceConfig};
pub use coordinator::{PipelineCoordinator, RunReport, StageOutcome, StageStatus, REPORT_FILE};
pub use mosaic::{MosaicAssembler, MosaicProduct};
pub use poller::{TaskPoller, TaskStatus};
pub use retriever::{parse_export_name, Artifact, ArtifactRetriever, FetchFailure, FetchReport};
pub use source_pipeline::{Collaborators, JobRecord, SourceFailure, SourcePipeline, SourceRun};
pub use submitter::{
    ClassificationJob, JobOutcome, JobSubmitter, SubmissionReport, SubmitParams,
};
