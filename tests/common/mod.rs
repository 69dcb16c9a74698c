//! Fake classification service for end-to-end tests.
//!
//! Submitting a tile writes its export raster straight into the local blob
//! store, the way the remote service would once the job finishes.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use inseason_mapper::error::{RasterError, ServiceError};
use inseason_mapper::pipeline::{Collaborators, RunConfig};
use inseason_mapper::raster::{
    ClassGrid, ClipBoundary, GridRaster, Palette, RasterFormat, RasterProcessor, NODATA,
};
use inseason_mapper::remote::{
    ClassificationService, Composite, ExportTarget, JobHandle, LocalBlobStore, RemoteState,
    TrainingSample,
};
use inseason_mapper::source::{DateWindow, Region, SourceKind, Tile, TileKey, TrainingLabels};

/// Top edge of every fake tile, inside the CONUS extent.
pub const TILE_TOP: f64 = 1_000_000.0;
pub const CELL: f64 = 30.0;

#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Exports `cells` as a 2x1 grid at `origin_x` and completes.
    Completes { origin_x: f64, cells: Vec<u8> },
    /// Exports a raster but the job ends failed.
    FailsAfterExport { origin_x: f64, cells: Vec<u8> },
    EmptyGeometry,
    SingleClass,
    SubmitError(String),
    /// Submits but stays running and never exports.
    Stuck,
}

pub struct FakeService {
    blob_root: PathBuf,
    tiles: BTreeMap<Tile, Behaviour>,
    states: Mutex<BTreeMap<String, Vec<RemoteState>>>,
    submissions: AtomicUsize,
    panicking_catalog: Option<SourceKind>,
}

impl FakeService {
    pub fn new(blob_root: &Path) -> Self {
        Self {
            blob_root: blob_root.to_path_buf(),
            tiles: BTreeMap::new(),
            states: Mutex::new(BTreeMap::new()),
            submissions: AtomicUsize::new(0),
            panicking_catalog: None,
        }
    }

    /// Tile listing for `source` panics.
    pub fn with_panicking_catalog(mut self, source: SourceKind) -> Self {
        self.panicking_catalog = Some(source);
        self
    }

    pub fn with_tile(mut self, source: SourceKind, key: TileKey, behaviour: Behaviour) -> Self {
        self.tiles.insert(Tile::new(source, key), behaviour);
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn behaviour(&self, tile: &Tile) -> Result<&Behaviour, ServiceError> {
        self.tiles
            .get(tile)
            .ok_or_else(|| ServiceError::Rejected(format!("unknown tile {}", tile)))
    }
}

pub fn write_tile(path: &Path, origin_x: f64, cells: &[u8]) {
    let mut grid = ClassGrid::filled(origin_x, TILE_TOP, CELL, cells.len(), 1, NODATA);
    grid.cells = cells.to_vec();
    grid.write(path).unwrap();
}

#[async_trait]
impl ClassificationService for FakeService {
    async fn available_tiles(
        &self,
        source: SourceKind,
        _region: &Region,
        _window: &DateWindow,
    ) -> Result<Vec<TileKey>, ServiceError> {
        if self.panicking_catalog == Some(source) {
            panic!("catalog for {} crashed", source);
        }
        Ok(self
            .tiles
            .keys()
            .filter(|t| t.source == source)
            .map(|t| t.key.clone())
            .collect())
    }

    async fn composite(
        &self,
        tile: &Tile,
        _window: &DateWindow,
        _cloud_cover: f64,
    ) -> Result<Composite, ServiceError> {
        let footprint_area = match self.behaviour(tile)? {
            Behaviour::EmptyGeometry => 0.0,
            _ => 1.0e9,
        };
        Ok(Composite {
            tile: tile.clone(),
            reference: tile.to_string(),
            footprint_area,
            scene_count: 4,
        })
    }

    async fn training_sample(
        &self,
        composite: &Composite,
        _labels: &TrainingLabels,
    ) -> Result<TrainingSample, ServiceError> {
        let class_counts = match self.behaviour(&composite.tile)? {
            Behaviour::SingleClass => BTreeMap::from([(1, 200)]),
            _ => BTreeMap::from([(1, 120), (5, 80)]),
        };
        Ok(TrainingSample {
            reference: format!("sample/{}", composite.reference),
            class_counts,
        })
    }

    async fn submit(
        &self,
        composite: &Composite,
        _sample: &TrainingSample,
        target: &ExportTarget,
    ) -> Result<JobHandle, ServiceError> {
        let artifact = self
            .blob_root
            .join(&target.folder)
            .join(format!("{}.tif", target.description));
        let final_state = match self.behaviour(&composite.tile)? {
            Behaviour::SubmitError(reason) => return Err(ServiceError::Rejected(reason.clone())),
            Behaviour::Completes { origin_x, cells } => {
                write_tile(&artifact, *origin_x, cells);
                RemoteState::Completed
            }
            Behaviour::FailsAfterExport { origin_x, cells } => {
                write_tile(&artifact, *origin_x, cells);
                RemoteState::Failed("out of memory".to_string())
            }
            Behaviour::Stuck => RemoteState::Running,
            Behaviour::EmptyGeometry | Behaviour::SingleClass => {
                return Err(ServiceError::Rejected("unexpected submission".to_string()))
            }
        };

        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let handle = format!("{}#{}", composite.reference, n);
        self.states
            .lock()
            .unwrap()
            .insert(handle.clone(), vec![RemoteState::Running, final_state]);
        Ok(JobHandle::new(handle))
    }

    async fn status(&self, handle: &JobHandle) -> Result<RemoteState, ServiceError> {
        let mut states = self.states.lock().unwrap();
        let queue = states
            .get_mut(handle.as_str())
            .ok_or_else(|| ServiceError::UnknownJob(handle.to_string()))?;
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            Ok(queue[0].clone())
        }
    }
}

/// Configuration for a run ending 2025-07-01 with fast intervals.
pub fn test_config(root: &Path) -> RunConfig {
    RunConfig::for_run_date(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
        .unwrap()
        .with_work_dir(root.join("work"))
        .with_output_dir(root.join("output"))
        .with_poll_interval(Duration::from_millis(5))
        .with_download_interval(Duration::ZERO)
        .with_grace_period(Duration::ZERO)
}

pub fn collaborators(service: Arc<FakeService>, blob_root: &Path) -> Collaborators {
    Collaborators {
        service,
        store: Arc::new(LocalBlobStore::new(blob_root)),
        raster: Arc::new(GridRaster::new()),
    }
}

/// Grid backend whose `convert` fails for outputs named with `marker`.
pub struct ConvertFails {
    inner: GridRaster,
    marker: String,
}

impl ConvertFails {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: GridRaster::new(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl RasterProcessor for ConvertFails {
    async fn build_mosaic(
        &self,
        inputs: &[PathBuf],
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        self.inner.build_mosaic(inputs, nodata, output).await
    }

    async fn clip(
        &self,
        input: &Path,
        boundary: &ClipBoundary,
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        self.inner.clip(input, boundary, nodata, output).await
    }

    async fn resample(
        &self,
        input: &Path,
        cell_size: f64,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        self.inner.resample(input, cell_size, format, output).await
    }

    async fn convert(
        &self,
        input: &Path,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        if output.to_string_lossy().contains(&self.marker) {
            return Err(RasterError::ToolFailed {
                tool: "gdal_translate".to_string(),
                code: Some(1),
                stderr: "driver HFA failed to create output".to_string(),
            });
        }
        self.inner.convert(input, format, output).await
    }

    async fn apply_palette(
        &self,
        path: &Path,
        palette: &Palette,
        nodata: u8,
    ) -> Result<(), RasterError> {
        self.inner.apply_palette(path, palette, nodata).await
    }
}
