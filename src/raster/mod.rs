//! Raster processing seam.
//!
//! The pipeline never decodes rasters itself. Everything pixel-related goes
//! through [`RasterProcessor`], which has two implementations:
//!
//! - **GdalCli**: drives the GDAL command-line tools
//! - **GridRaster**: a JSON grid backend for dry runs and tests
//!
//! # Merge order
//!
//! `build_mosaic` receives its inputs in merge order. Where inputs overlap,
//! a later input's value wins unless that value is the no-data sentinel, in
//! which case the earlier value is kept.

pub mod gdal;
pub mod grid;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RasterError;
use crate::source::BoundingBox;

pub use gdal::GdalCli;
pub use grid::{ClassGrid, GridRaster};

/// Pixel value meaning "no valid classification".
pub const NODATA: u8 = 0;

/// Output container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterFormat {
    GeoTiff,
    /// Cloud-optimized GeoTIFF.
    Cog,
    /// ERDAS Imagine (`.img`), the archival format.
    ErdasImagine,
}

impl RasterFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::GeoTiff | RasterFormat::Cog => "tif",
            RasterFormat::ErdasImagine => "img",
        }
    }

    pub fn gdal_driver(&self) -> &'static str {
        match self {
            RasterFormat::GeoTiff => "GTiff",
            RasterFormat::Cog => "COG",
            RasterFormat::ErdasImagine => "HFA",
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.gdal_driver())
    }
}

/// Boundary a raster is clipped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipBoundary {
    /// Polygon cutline read from a shapefile.
    Shapefile(PathBuf),
    /// Rectangular extent.
    Extent(BoundingBox),
}

impl fmt::Display for ClipBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipBoundary::Shapefile(path) => write!(f, "{}", path.display()),
            ClipBoundary::Extent(b) => {
                write!(f, "[{}, {}, {}, {}]", b.min_x, b.min_y, b.max_x, b.max_y)
            }
        }
    }
}

/// Class value to RGB color table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Palette {
    pub entries: BTreeMap<u8, [u8; 3]>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, class: u8, rgb: [u8; 3]) -> Self {
        self.entries.insert(class, rgb);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a YAML mapping of `class: [r, g, b]`.
    pub fn from_yaml_file(path: &Path) -> Result<Self, RasterError> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| RasterError::InvalidRaster {
            path: path.to_path_buf(),
            reason: format!("invalid palette: {}", e),
        })
    }

    /// RGBA entries for every class, with `nodata` rendered transparent.
    pub fn rgba_entries(&self, nodata: u8) -> Vec<(u8, [u8; 4])> {
        let mut entries: BTreeMap<u8, [u8; 4]> = self
            .entries
            .iter()
            .map(|(&class, &[r, g, b])| (class, [r, g, b, 255]))
            .collect();
        entries.insert(nodata, [255, 255, 255, 0]);
        entries.into_iter().collect()
    }
}

/// Raster operations the pipeline relies on.
#[async_trait]
pub trait RasterProcessor: Send + Sync {
    /// Merges `inputs` (in merge order) into one raster covering their union.
    async fn build_mosaic(
        &self,
        inputs: &[PathBuf],
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError>;

    /// Clips `input` to `boundary`, cropping to its extent.
    async fn clip(
        &self,
        input: &Path,
        boundary: &ClipBoundary,
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError>;

    /// Nearest-neighbour resample to `cell_size` meters.
    async fn resample(
        &self,
        input: &Path,
        cell_size: f64,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError>;

    async fn convert(
        &self,
        input: &Path,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError>;

    /// Attaches `palette` to the raster at `path` in place.
    async fn apply_palette(
        &self,
        path: &Path,
        palette: &Palette,
        nodata: u8,
    ) -> Result<(), RasterError>;
}
