//! Run configuration for the mapping pipeline.
//!
//! A [`RunConfig`] is built in layers: [`Default`], then an optional YAML
//! file, then `INSEASON_*` environment variables, then command-line flags.
//! The finished value is passed to the coordinator; nothing reads global
//! configuration after that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::{ClipBoundary, Palette};
use crate::source::{
    DateWindow, Region, RunLabel, SourceKind, TrainingLabels, DEFAULT_HISTORY_GAP,
};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The YAML configuration file could not be parsed.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for one source pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Maximum scene cloud cover in percent.
    pub cloud_cover: f64,
    /// Remote folder the tile exports are written to.
    pub export_folder: String,
    /// Cap on enumerated tiles, for debugging runs.
    pub max_tiles: Option<usize>,
}

impl SourceConfig {
    pub fn for_source(source: SourceKind) -> Self {
        Self {
            enabled: true,
            cloud_cover: source.default_cloud_cover(),
            export_folder: source.default_export_folder().to_string(),
            max_tiles: None,
        }
    }
}

/// Task poller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status sweeps.
    pub interval: Duration,
    /// Per-job deadline measured from the start of polling.
    pub job_timeout: Option<Duration>,
    /// Consecutive status-query errors tolerated before a job is failed.
    pub max_status_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            job_timeout: None,
            max_status_errors: 10,
        }
    }
}

/// Artifact retriever settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveConfig {
    /// Pause between consecutive downloads, to stay under the remote quota.
    pub download_interval: Duration,
    /// File extensions treated as raster artifacts (lowercase, no dot).
    pub extensions: Vec<String>,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            download_interval: Duration::from_secs(1),
            extensions: vec!["tif".to_string(), "tiff".to_string()],
        }
    }
}

impl RetrieveConfig {
    pub fn accepts(&self, name: &str) -> bool {
        name.rsplit_once('.')
            .map(|(_, ext)| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Configuration of one mapping run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    // Products
    pub label: RunLabel,
    /// Scene window classified by this run.
    pub window: DateWindow,
    /// Short window used only to discover tile coverage.
    pub catalog_window: DateWindow,
    pub region: Region,
    pub clip_boundary: ClipBoundary,
    pub training_labels: TrainingLabels,
    /// Fine product cell size in meters.
    pub fine_cell_size: u32,
    /// Coarse product cell size in meters.
    pub coarse_cell_size: u32,
    /// CRS the remote exports are written in.
    pub export_crs: String,
    pub palette: Option<Palette>,

    // Sources
    pub landsat: SourceConfig,
    pub sentinel: SourceConfig,

    // Execution
    pub poll: PollConfig,
    pub retrieve: RetrieveConfig,
    pub submit_concurrency: usize,
    /// Re-submissions allowed for jobs that fail, are cancelled or time out.
    pub max_resubmissions: u32,
    /// Deadline for the source phase, measured from its start. Reaching it
    /// stops polling in both sources; pending jobs become `Aborted`.
    /// Downloads, mosaics and post-processing are not bounded by it.
    pub run_timeout: Option<Duration>,
    /// Wait before deleting remote export folders.
    pub grace_period: Duration,

    // Storage
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keep_intermediates: bool,
    pub cleanup_remote: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        let today = chrono::Local::now().date_naive();
        let year = today.year();
        let season_start = NaiveDate::from_ymd_opt(year, 5, 1).unwrap_or(today);
        let window = DateWindow {
            start: season_start,
            end: today.max(season_start + chrono::Duration::days(1)),
        };

        Self {
            label: RunLabel::previous_month(today),
            window,
            catalog_window: DateWindow::catalog_reference(year).unwrap_or(window),
            region: Region::conus(),
            clip_boundary: ClipBoundary::Extent(Region::conus().bbox),
            training_labels: TrainingLabels {
                reference_year: year,
                history_gap: DEFAULT_HISTORY_GAP,
            },
            fine_cell_size: 10,
            coarse_cell_size: 30,
            export_crs: "EPSG:5070".to_string(),
            palette: None,

            landsat: SourceConfig::for_source(SourceKind::Landsat),
            sentinel: SourceConfig::for_source(SourceKind::Sentinel),

            poll: PollConfig::default(),
            retrieve: RetrieveConfig::default(),
            submit_concurrency: 8,
            max_resubmissions: 0,
            run_timeout: None,
            grace_period: Duration::from_secs(30),

            work_dir: PathBuf::from("./work"),
            output_dir: PathBuf::from("./output"),
            keep_intermediates: false,
            cleanup_remote: true,
        }
    }
}

impl RunConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a run started on `date`: the growing season up to
    /// `date`, labelled with the preceding month. Runs on or before May 1st
    /// belong to the previous year's season.
    pub fn for_run_date(date: NaiveDate) -> Result<Self, ConfigError> {
        let season_start = NaiveDate::from_ymd_opt(date.year(), 5, 1)
            .ok_or_else(|| ConfigError::ValidationFailed(format!("invalid date {}", date)))?;
        let season_year = if date > season_start {
            date.year()
        } else {
            date.year() - 1
        };
        let window = DateWindow::season_to_date(season_year, date)
            .map_err(ConfigError::ValidationFailed)?;
        Self::for_window(window)
    }

    /// Configuration for an explicit processing window. The season year is
    /// the window start's year; the label is the month before the window end.
    pub fn for_window(window: DateWindow) -> Result<Self, ConfigError> {
        let season_year = window.start.year();
        let catalog_window =
            DateWindow::catalog_reference(season_year).map_err(ConfigError::ValidationFailed)?;
        let training_labels = TrainingLabels::new(season_year, DEFAULT_HISTORY_GAP)
            .map_err(ConfigError::ValidationFailed)?;
        Ok(Self {
            label: RunLabel::previous_month(window.end),
            window,
            catalog_window,
            training_labels,
            ..Self::default()
        })
    }

    /// Settings of one source.
    pub fn source(&self, source: SourceKind) -> &SourceConfig {
        match source {
            SourceKind::Landsat => &self.landsat,
            SourceKind::Sentinel => &self.sentinel,
        }
    }

    pub fn source_mut(&mut self, source: SourceKind) -> &mut SourceConfig {
        match source {
            SourceKind::Landsat => &mut self.landsat,
            SourceKind::Sentinel => &mut self.sentinel,
        }
    }

    /// Local folder the source's artifacts are downloaded into.
    pub fn tile_dir(&self, source: SourceKind) -> PathBuf {
        self.work_dir.join(self.source(source).export_folder.as_str())
    }

    /// Folder holding per-source and combined mosaics.
    pub fn mosaic_dir(&self) -> PathBuf {
        self.work_dir.join("mosaics")
    }

    /// Applies a YAML overlay file on top of this configuration.
    pub fn with_yaml_file(self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let overlay: ConfigFile = serde_yaml::from_str(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        overlay.apply(self, base_dir)
    }

    /// Creates configuration from defaults plus environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `INSEASON_LANDSAT_CLOUD`: Landsat cloud cover percent (default: 15)
    /// - `INSEASON_SENTINEL_CLOUD`: Sentinel cloud cover percent (default: 10)
    /// - `INSEASON_LANDSAT_FOLDER`: Landsat export folder
    /// - `INSEASON_SENTINEL_FOLDER`: Sentinel export folder
    /// - `INSEASON_POLL_INTERVAL_SECS`: Poll interval (default: 30)
    /// - `INSEASON_JOB_TIMEOUT_SECS`: Per-job deadline (default: none)
    /// - `INSEASON_RUN_TIMEOUT_SECS`: Whole-run deadline (default: none)
    /// - `INSEASON_MAX_RESUBMISSIONS`: Resubmissions per job (default: 0)
    /// - `INSEASON_SUBMIT_CONCURRENCY`: Concurrent submissions (default: 8)
    /// - `INSEASON_DOWNLOAD_INTERVAL_MS`: Pause between downloads (default: 1000)
    /// - `INSEASON_GRACE_PERIOD_SECS`: Wait before remote cleanup (default: 30)
    /// - `INSEASON_WORK_DIR`: Intermediate files (default: ./work)
    /// - `INSEASON_OUTPUT_DIR`: Final products (default: ./output)
    /// - `INSEASON_KEEP_INTERMEDIATES`: Skip local cleanup (default: false)
    /// - `INSEASON_CLEANUP_REMOTE`: Delete remote exports (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `INSEASON_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `INSEASON_*` overrides read through `lookup`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("INSEASON_LANDSAT_CLOUD") {
            self.landsat.cloud_cover = parse_env_value(&val, "INSEASON_LANDSAT_CLOUD")?;
        }
        if let Some(val) = lookup("INSEASON_SENTINEL_CLOUD") {
            self.sentinel.cloud_cover = parse_env_value(&val, "INSEASON_SENTINEL_CLOUD")?;
        }
        if let Some(val) = lookup("INSEASON_LANDSAT_FOLDER") {
            self.landsat.export_folder = val;
        }
        if let Some(val) = lookup("INSEASON_SENTINEL_FOLDER") {
            self.sentinel.export_folder = val;
        }

        if let Some(val) = lookup("INSEASON_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "INSEASON_POLL_INTERVAL_SECS")?;
            self.poll.interval = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("INSEASON_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "INSEASON_JOB_TIMEOUT_SECS")?;
            self.poll.job_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(val) = lookup("INSEASON_RUN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "INSEASON_RUN_TIMEOUT_SECS")?;
            self.run_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(val) = lookup("INSEASON_MAX_RESUBMISSIONS") {
            self.max_resubmissions = parse_env_value(&val, "INSEASON_MAX_RESUBMISSIONS")?;
        }
        if let Some(val) = lookup("INSEASON_SUBMIT_CONCURRENCY") {
            self.submit_concurrency = parse_env_value(&val, "INSEASON_SUBMIT_CONCURRENCY")?;
        }
        if let Some(val) = lookup("INSEASON_DOWNLOAD_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "INSEASON_DOWNLOAD_INTERVAL_MS")?;
            self.retrieve.download_interval = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("INSEASON_GRACE_PERIOD_SECS") {
            let secs: u64 = parse_env_value(&val, "INSEASON_GRACE_PERIOD_SECS")?;
            self.grace_period = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("INSEASON_WORK_DIR") {
            self.work_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("INSEASON_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("INSEASON_KEEP_INTERMEDIATES") {
            self.keep_intermediates = parse_env_bool(&val, "INSEASON_KEEP_INTERMEDIATES")?;
        }
        if let Some(val) = lookup("INSEASON_CLEANUP_REMOTE") {
            self.cleanup_remote = parse_env_bool(&val, "INSEASON_CLEANUP_REMOTE")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.start >= self.window.end {
            return Err(ConfigError::ValidationFailed(format!(
                "window start {} must be before end {}",
                self.window.start, self.window.end
            )));
        }

        if self.catalog_window.start >= self.catalog_window.end {
            return Err(ConfigError::ValidationFailed(
                "catalog_window start must be before its end".to_string(),
            ));
        }

        if !(1..=12).contains(&self.label.month) {
            return Err(ConfigError::ValidationFailed(format!(
                "label month must be 1-12, got {}",
                self.label.month
            )));
        }

        if self.training_labels.history_gap < 2 {
            return Err(ConfigError::ValidationFailed(
                "training_labels.history_gap must be at least 2".to_string(),
            ));
        }

        for source in SourceKind::ALL {
            let cfg = self.source(source);
            if !(0.0..=100.0).contains(&cfg.cloud_cover) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cloud_cover must be between 0 and 100",
                    source
                )));
            }
            if cfg.export_folder.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} export_folder cannot be empty",
                    source
                )));
            }
            if cfg.max_tiles == Some(0) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} max_tiles must be greater than 0",
                    source
                )));
            }
        }

        if self.landsat.export_folder == self.sentinel.export_folder {
            return Err(ConfigError::ValidationFailed(
                "landsat and sentinel export folders must differ".to_string(),
            ));
        }

        if !self.landsat.enabled && !self.sentinel.enabled {
            return Err(ConfigError::ValidationFailed(
                "at least one source must be enabled".to_string(),
            ));
        }

        if self.poll.interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if self.poll.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll.max_status_errors == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_status_errors must be greater than 0".to_string(),
            ));
        }

        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "run_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retrieve.extensions.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "retrieve extensions cannot be empty".to_string(),
            ));
        }

        if self.submit_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "submit_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.fine_cell_size == 0 || self.coarse_cell_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "cell sizes must be greater than 0".to_string(),
            ));
        }

        if self.coarse_cell_size < self.fine_cell_size {
            return Err(ConfigError::ValidationFailed(
                "coarse_cell_size cannot be finer than fine_cell_size".to_string(),
            ));
        }

        if self.work_dir == self.output_dir {
            return Err(ConfigError::ValidationFailed(
                "work_dir and output_dir must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the label.
    pub fn with_label(mut self, label: RunLabel) -> Self {
        self.label = label;
        self
    }

    /// Builder method to set the processing window.
    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    /// Builder method to set the catalog reference window.
    pub fn with_catalog_window(mut self, window: DateWindow) -> Self {
        self.catalog_window = window;
        self
    }

    /// Builder method to set the region of interest.
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Builder method to set the clip boundary.
    pub fn with_clip_boundary(mut self, boundary: ClipBoundary) -> Self {
        self.clip_boundary = boundary;
        self
    }

    /// Builder method to set a source's cloud cover threshold.
    pub fn with_cloud_cover(mut self, source: SourceKind, percent: f64) -> Self {
        self.source_mut(source).cloud_cover = percent;
        self
    }

    /// Builder method to enable or disable a source.
    pub fn with_source_enabled(mut self, source: SourceKind, enabled: bool) -> Self {
        self.source_mut(source).enabled = enabled;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Builder method to set the per-job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.poll.job_timeout = Some(timeout);
        self
    }

    /// Builder method to set the run timeout.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Builder method to set the download interval.
    pub fn with_download_interval(mut self, interval: Duration) -> Self {
        self.retrieve.download_interval = interval;
        self
    }

    /// Builder method to set the number of resubmissions.
    pub fn with_max_resubmissions(mut self, max: u32) -> Self {
        self.max_resubmissions = max;
        self
    }

    /// Builder method to set submit concurrency.
    pub fn with_submit_concurrency(mut self, max: usize) -> Self {
        self.submit_concurrency = max;
        self
    }

    /// Builder method to set the remote cleanup grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Builder method to set the work directory.
    pub fn with_work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = path.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the palette applied to the combined product.
    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    /// Builder method to keep intermediate files.
    pub fn with_keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Builder method to enable or disable remote cleanup.
    pub fn with_cleanup_remote(mut self, enabled: bool) -> Self {
        self.cleanup_remote = enabled;
        self
    }
}

/// Per-source section of the YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SourceSection {
    enabled: Option<bool>,
    cloud_cover: Option<f64>,
    export_folder: Option<String>,
    max_tiles: Option<usize>,
}

impl SourceSection {
    fn apply(self, cfg: &mut SourceConfig) {
        if let Some(v) = self.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = self.cloud_cover {
            cfg.cloud_cover = v;
        }
        if let Some(v) = self.export_folder {
            cfg.export_folder = v;
        }
        if self.max_tiles.is_some() {
            cfg.max_tiles = self.max_tiles;
        }
    }
}

/// YAML configuration file. Every field is optional and overrides the layer
/// below it; relative paths resolve against the file's directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    label_year: Option<i32>,
    label_month: Option<u32>,
    history_gap: Option<u32>,
    region: Option<Region>,
    boundary: Option<PathBuf>,
    palette: Option<PathBuf>,
    fine_cell_size: Option<u32>,
    coarse_cell_size: Option<u32>,
    export_crs: Option<String>,
    landsat: Option<SourceSection>,
    sentinel: Option<SourceSection>,
    poll_interval_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
    max_status_errors: Option<u32>,
    run_timeout_secs: Option<u64>,
    download_interval_ms: Option<u64>,
    extensions: Option<Vec<String>>,
    submit_concurrency: Option<usize>,
    max_resubmissions: Option<u32>,
    grace_period_secs: Option<u64>,
    work_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    keep_intermediates: Option<bool>,
    cleanup_remote: Option<bool>,
}

impl ConfigFile {
    fn apply(self, mut config: RunConfig, base_dir: &Path) -> Result<RunConfig, ConfigError> {
        let resolve = |p: PathBuf| if p.is_relative() { base_dir.join(p) } else { p };

        if self.start.is_some() || self.end.is_some() {
            let start = self.start.unwrap_or(config.window.start);
            let end = self.end.unwrap_or(config.window.end);
            config.window = DateWindow::new(start, end).map_err(ConfigError::ValidationFailed)?;
        }
        if self.label_year.is_some() || self.label_month.is_some() {
            config.label = RunLabel::new(
                self.label_year.unwrap_or(config.label.year),
                self.label_month.unwrap_or(config.label.month),
            )
            .map_err(ConfigError::ValidationFailed)?;
        }
        if let Some(gap) = self.history_gap {
            config.training_labels.history_gap = gap;
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(boundary) = self.boundary {
            config.clip_boundary = ClipBoundary::Shapefile(resolve(boundary));
        }
        if let Some(palette) = self.palette {
            config.palette = Some(
                Palette::from_yaml_file(&resolve(palette)).map_err(|e| ConfigError::InvalidValue {
                    key: "palette".to_string(),
                    message: e.to_string(),
                })?,
            );
        }
        if let Some(v) = self.fine_cell_size {
            config.fine_cell_size = v;
        }
        if let Some(v) = self.coarse_cell_size {
            config.coarse_cell_size = v;
        }
        if let Some(v) = self.export_crs {
            config.export_crs = v;
        }
        if let Some(section) = self.landsat {
            section.apply(&mut config.landsat);
        }
        if let Some(section) = self.sentinel {
            section.apply(&mut config.sentinel);
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll.interval = Duration::from_secs(v);
        }
        if let Some(v) = self.job_timeout_secs {
            config.poll.job_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = self.max_status_errors {
            config.poll.max_status_errors = v;
        }
        if let Some(v) = self.run_timeout_secs {
            config.run_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = self.download_interval_ms {
            config.retrieve.download_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.extensions {
            config.retrieve.extensions = v.into_iter().map(|e| e.to_lowercase()).collect();
        }
        if let Some(v) = self.submit_concurrency {
            config.submit_concurrency = v;
        }
        if let Some(v) = self.max_resubmissions {
            config.max_resubmissions = v;
        }
        if let Some(v) = self.grace_period_secs {
            config.grace_period = Duration::from_secs(v);
        }
        if let Some(v) = self.work_dir {
            config.work_dir = resolve(v);
        }
        if let Some(v) = self.output_dir {
            config.output_dir = resolve(v);
        }
        if let Some(v) = self.keep_intermediates {
            config.keep_intermediates = v;
        }
        if let Some(v) = self.cleanup_remote {
            config.cleanup_remote = v;
        }
        Ok(config)
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
