//! Prometheus metrics for mapping runs.
//!
//! Counts tiles by submission outcome, jobs by terminal status, downloads and
//! coordinator stages. The CLI can write the text exposition to a file after
//! a run.
//!
//! # Example
//!
//! ```ignore
//! use inseason_mapper::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_tile("landsat", "submitted");
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, write_metrics_file};

pub use prometheus::{
    DOWNLOADS_TOTAL, DOWNLOAD_BYTES, JOBS_PENDING, JOBS_TOTAL, POLL_SWEEPS_TOTAL, REGISTRY,
    STAGES_TOTAL, STAGE_DURATION, TILES_TOTAL,
};
