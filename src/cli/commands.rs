//! CLI command definitions for inseason-mapper.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::metrics::{init_metrics, write_metrics_file};
use crate::pipeline::{Collaborators, PipelineCoordinator, RunConfig, TileCatalog};
use crate::raster::{ClipBoundary, GdalCli, GridRaster, RasterProcessor};
use crate::remote::{HttpClassificationService, LocalBlobStore};
use crate::source::{DateWindow, RunLabel, SourceKind};

/// Default output directory for final products.
const DEFAULT_OUTPUT_DIR: &str = "./output";

/// In-season crop map production.
#[derive(Parser)]
#[command(name = "inseason-mapper")]
#[command(about = "Produce in-season crop maps from per-tile remote classification jobs")]
#[command(version)]
#[command(
    long_about = "inseason-mapper submits one classification job per Landsat and Sentinel tile, waits for the exports, and mosaics, clips and converts them into the monthly crop map.\n\nExample usage:\n  inseason-mapper run --start 2025-05-01 --end 2025-07-01 --output ./output --blob-root /mnt/drive"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full mapping pipeline.
    Run(Box<RunArgs>),

    /// Print the tiles the catalog enumerates for one source.
    Tiles(TilesArgs),
}

/// Raster processing backend.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterBackend {
    /// GDAL command-line tools.
    Gdal,
    /// Built-in class grids, for dry runs.
    Grid,
}

/// Arguments for `inseason-mapper run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// First scene date (default: May 1st of the season containing --end).
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Scene window end, exclusive (default: today).
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Label year (default: the month before --end).
    #[arg(long, requires = "label_month")]
    pub label_year: Option<i32>,

    /// Label month, 1-12.
    #[arg(long, requires = "label_year")]
    pub label_month: Option<u32>,

    /// Maximum Landsat scene cloud cover in percent.
    #[arg(long)]
    pub landsat_cloud: Option<f64>,

    /// Maximum Sentinel scene cloud cover in percent.
    #[arg(long)]
    pub sentinel_cloud: Option<f64>,

    /// Output directory for final products.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Directory for downloaded tiles and intermediate mosaics.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Shapefile the combined map is clipped to.
    #[arg(long)]
    pub boundary: Option<PathBuf>,

    /// Local root of the synced export storage.
    #[arg(long, env = "INSEASON_BLOB_ROOT")]
    pub blob_root: PathBuf,

    /// Raster processing backend.
    #[arg(long, value_enum, default_value = "gdal")]
    pub raster_backend: RasterBackend,

    /// Directory holding the GDAL executables (default: PATH).
    #[arg(long, env = "GDAL_BIN_DIR")]
    pub gdal_bin_dir: Option<PathBuf>,

    /// Seconds between status sweeps.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Per-job deadline in seconds.
    #[arg(long)]
    pub job_timeout: Option<u64>,

    /// Whole-run deadline in seconds.
    #[arg(long)]
    pub run_timeout: Option<u64>,

    /// Resubmissions allowed per failed job.
    #[arg(long)]
    pub max_resubmissions: Option<u32>,

    /// Keep downloaded tiles and intermediate mosaics.
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Leave the remote export folders in place.
    #[arg(long)]
    pub no_remote_cleanup: bool,

    /// Write Prometheus metrics to this file when the run ends.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

/// Arguments for `inseason-mapper tiles`.
#[derive(Parser, Debug)]
pub struct TilesArgs {
    /// Imagery source (landsat, sentinel).
    #[arg(short, long)]
    pub source: SourceKind,

    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(*args).await,
        Commands::Tiles(args) => run_tiles_command(args).await,
    }
}

/// Layers the configuration file, environment and flags over the defaults
/// for the run date.
fn build_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let end = args.end.unwrap_or_else(|| chrono::Local::now().date_naive());
    let mut config = match args.start {
        Some(start) => {
            let window = DateWindow::new(start, end).map_err(|e| anyhow::anyhow!(e))?;
            RunConfig::for_window(window)?
        }
        None => RunConfig::for_run_date(end)?,
    };
    if let Some(ref path) = args.config {
        config = config
            .with_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    config = config.with_env_overrides()?;

    // Flags win over the file and environment.
    if let Some(start) = args.start {
        let window = DateWindow::new(start, end).map_err(|e| anyhow::anyhow!(e))?;
        config = config.with_window(window);
    }
    if let (Some(year), Some(month)) = (args.label_year, args.label_month) {
        let label = RunLabel::new(year, month).map_err(|e| anyhow::anyhow!(e))?;
        config = config.with_label(label);
    }
    if let Some(pct) = args.landsat_cloud {
        config = config.with_cloud_cover(SourceKind::Landsat, pct);
    }
    if let Some(pct) = args.sentinel_cloud {
        config = config.with_cloud_cover(SourceKind::Sentinel, pct);
    }
    config = config.with_output_dir(&args.output);
    if let Some(ref dir) = args.work_dir {
        config = config.with_work_dir(dir);
    }
    if let Some(ref boundary) = args.boundary {
        config = config.with_clip_boundary(ClipBoundary::Shapefile(boundary.clone()));
    }
    if let Some(secs) = args.poll_interval {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = args.job_timeout {
        config = config.with_job_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.run_timeout {
        config = config.with_run_timeout(Duration::from_secs(secs));
    }
    if let Some(max) = args.max_resubmissions {
        config = config.with_max_resubmissions(max);
    }
    if args.keep_intermediates {
        config = config.with_keep_intermediates(true);
    }
    if args.no_remote_cleanup {
        config = config.with_cleanup_remote(false);
    }

    config.validate()?;
    Ok(config)
}

fn build_raster(args: &RunArgs) -> Arc<dyn RasterProcessor> {
    match args.raster_backend {
        RasterBackend::Grid => Arc::new(GridRaster::new()),
        RasterBackend::Gdal => match args.gdal_bin_dir {
            Some(ref dir) => Arc::new(GdalCli::new().with_bin_dir(dir)),
            None => Arc::new(GdalCli::new()),
        },
    }
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    init_metrics().context("registering metrics")?;
    let config = build_config(&args)?;
    info!(
        label = %config.label,
        window = %config.window,
        output = %config.output_dir.display(),
        "Configuration loaded"
    );

    let service = HttpClassificationService::from_env()?;
    let collaborators = Collaborators {
        service: Arc::new(service),
        store: Arc::new(LocalBlobStore::new(&args.blob_root)),
        raster: build_raster(&args),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pending jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    let coordinator = PipelineCoordinator::new(config, collaborators).with_shutdown(shutdown_rx);
    let report = coordinator.run().await?;

    if let Some(ref path) = args.metrics_file {
        if let Err(e) = write_metrics_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    println!("Run {} ({})", report.run_id, report.label);
    for stage in &report.stages {
        println!("  {:<16} {:?}", stage.stage, stage.status);
    }
    for product in &report.products {
        println!("  product: {}", product.display());
    }

    match report.error() {
        None => Ok(()),
        Some(e) => Err(e.into()),
    }
}

async fn run_tiles_command(args: TilesArgs) -> anyhow::Result<()> {
    let mut config = RunConfig::new();
    if let Some(ref path) = args.config {
        config = config
            .with_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    let config = config.with_env_overrides()?;

    let service = Arc::new(HttpClassificationService::from_env()?);
    let catalog = TileCatalog::new(service);
    let tiles = catalog
        .enumerate(
            args.source,
            &config.region,
            &config.catalog_window,
            config.source(args.source).max_tiles,
        )
        .await?;

    for tile in &tiles {
        println!("{}", tile.key);
    }
    info!(source = %args.source, tiles = tiles.len(), "Listed tiles");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Commands::Run(args) => *args,
            Commands::Tiles(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let cli = parse(&[
            "inseason-mapper",
            "run",
            "--start",
            "2025-05-01",
            "--end",
            "2025-07-01",
            "--landsat-cloud",
            "20",
            "--sentinel-cloud",
            "5",
            "--output",
            output.to_str().unwrap(),
            "--blob-root",
            "/tmp/blobs",
            "--max-resubmissions",
            "2",
            "--no-remote-cleanup",
        ]);
        let config = build_config(&run_args(cli)).unwrap();

        assert_eq!(config.label, RunLabel::new(2025, 6).unwrap());
        assert_eq!(config.window.start, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
        assert_eq!(config.landsat.cloud_cover, 20.0);
        assert_eq!(config.sentinel.cloud_cover, 5.0);
        assert_eq!(config.max_resubmissions, 2);
        assert!(!config.cleanup_remote);
        assert_eq!(config.output_dir, output);
    }

    #[test]
    fn test_window_crossing_the_new_year() {
        let cli = parse(&[
            "inseason-mapper",
            "run",
            "--start",
            "2024-05-01",
            "--end",
            "2025-01-15",
            "--blob-root",
            "/tmp/blobs",
        ]);
        let config = build_config(&run_args(cli)).unwrap();

        assert_eq!(config.window.start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(config.window.end, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(config.label, RunLabel::new(2024, 12).unwrap());
        assert_eq!(config.training_labels.reference_year, 2024);
    }

    #[test]
    fn test_winter_end_without_start_uses_last_season() {
        let cli = parse(&[
            "inseason-mapper",
            "run",
            "--end",
            "2025-01-15",
            "--blob-root",
            "/tmp/blobs",
        ]);
        let config = build_config(&run_args(cli)).unwrap();
        assert_eq!(config.window.start, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(config.label, RunLabel::new(2024, 12).unwrap());
    }

    #[test]
    fn test_label_flags_must_be_paired() {
        let result = Cli::try_parse_from([
            "inseason-mapper",
            "run",
            "--label-year",
            "2025",
            "--blob-root",
            "/tmp/blobs",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_cloud_cover_is_rejected() {
        let cli = parse(&[
            "inseason-mapper",
            "run",
            "--end",
            "2025-07-01",
            "--landsat-cloud",
            "140",
            "--blob-root",
            "/tmp/blobs",
        ]);
        assert!(build_config(&run_args(cli)).is_err());
    }

    #[test]
    fn test_tiles_source_parses() {
        let cli = parse(&["inseason-mapper", "tiles", "--source", "sentinel"]);
        match cli.command {
            Commands::Tiles(args) => assert_eq!(args.source, SourceKind::Sentinel),
            Commands::Run(_) => panic!("expected tiles"),
        }
    }

    #[test]
    fn test_raster_backend_default() {
        let cli = parse(&["inseason-mapper", "run", "--blob-root", "/tmp/blobs"]);
        assert_eq!(run_args(cli).raster_backend, RasterBackend::Gdal);
    }
}
