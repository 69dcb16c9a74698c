//! JSON grid raster backend.
//!
//! Stores a single-band classification raster as a JSON document. It has no
//! compression or georeferencing beyond an origin and a square cell size,
//! which is enough to exercise the whole pipeline without GDAL installed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ClipBoundary, Palette, RasterFormat, RasterProcessor};
use crate::error::RasterError;
use crate::source::BoundingBox;

/// Single-band `u8` grid. Row 0 is the northern edge; `origin_y` is the
/// maximum y coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub width: usize,
    pub height: usize,
    pub nodata: u8,
    pub cells: Vec<u8>,
    pub format: RasterFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Palette>,
}

impl ClassGrid {
    /// Grid filled with `nodata`.
    pub fn filled(
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        width: usize,
        height: usize,
        nodata: u8,
    ) -> Self {
        Self {
            origin_x,
            origin_y,
            cell_size,
            width,
            height,
            nodata,
            cells: vec![nodata; width * height],
            format: RasterFormat::GeoTiff,
            palette: None,
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<u8> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.cells.get(row * self.width + col).copied()
    }

    pub fn set(&mut self, col: usize, row: usize, value: u8) {
        if col < self.width && row < self.height {
            self.cells[row * self.width + col] = value;
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - self.height as f64 * self.cell_size,
            self.origin_x + self.width as f64 * self.cell_size,
            self.origin_y,
        )
    }

    /// Value at map coordinate `(x, y)`, if inside the grid.
    pub fn sample(&self, x: f64, y: f64) -> Option<u8> {
        if !self.bounds().contains(x, y) {
            return None;
        }
        let col = ((x - self.origin_x) / self.cell_size).floor() as usize;
        let row = ((self.origin_y - y) / self.cell_size).floor() as usize;
        self.get(col, row)
    }

    fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    fn check(&self, path: &Path) -> Result<(), RasterError> {
        if self.cells.len() != self.width * self.height || self.cell_size <= 0.0 {
            return Err(RasterError::InvalidRaster {
                path: path.to_path_buf(),
                reason: format!(
                    "{} cells for {}x{} grid at cell size {}",
                    self.cells.len(),
                    self.width,
                    self.height,
                    self.cell_size
                ),
            });
        }
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, RasterError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RasterError::MissingInput(path.to_path_buf())
            } else {
                RasterError::Io(e)
            }
        })?;
        let grid: ClassGrid = serde_json::from_str(&text)?;
        grid.check(path)?;
        Ok(grid)
    }

    pub fn write(&self, path: &Path) -> Result<(), RasterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// Merges grids in order: a later non-`nodata` value overwrites an earlier one.
pub fn merge_grids(grids: &[ClassGrid], nodata: u8) -> Result<ClassGrid, RasterError> {
    let first = grids.first().ok_or(RasterError::NoInputs)?;
    let cell_size = first.cell_size;
    if grids.iter().any(|g| (g.cell_size - cell_size).abs() > f64::EPSILON) {
        return Err(RasterError::Unsupported(
            "mosaic inputs must share one cell size".to_string(),
        ));
    }

    let extent = grids
        .iter()
        .skip(1)
        .fold(first.bounds(), |acc, g| acc.union(&g.bounds()));
    let width = (extent.width() / cell_size).round() as usize;
    let height = (extent.height() / cell_size).round() as usize;
    let mut merged = ClassGrid::filled(extent.min_x, extent.max_y, cell_size, width, height, nodata);
    merged.format = first.format;

    for grid in grids {
        let col_offset = ((grid.origin_x - merged.origin_x) / cell_size).round() as usize;
        let row_offset = ((merged.origin_y - grid.origin_y) / cell_size).round() as usize;
        for row in 0..grid.height {
            for col in 0..grid.width {
                let value = grid.cells[row * grid.width + col];
                if value != nodata && value != grid.nodata {
                    merged.set(col + col_offset, row + row_offset, value);
                }
            }
        }
    }
    Ok(merged)
}

/// Keeps the cells whose centers fall inside `extent`, cropped to them.
pub fn clip_grid(grid: &ClassGrid, extent: &BoundingBox) -> Option<ClassGrid> {
    let cols: Vec<usize> = (0..grid.width)
        .filter(|&c| {
            let (x, _) = grid.cell_center(c, 0);
            x >= extent.min_x && x < extent.max_x
        })
        .collect();
    let rows: Vec<usize> = (0..grid.height)
        .filter(|&r| {
            let (_, y) = grid.cell_center(0, r);
            y >= extent.min_y && y < extent.max_y
        })
        .collect();
    let (&c0, &r0) = (cols.first()?, rows.first()?);

    let mut clipped = ClassGrid::filled(
        grid.origin_x + c0 as f64 * grid.cell_size,
        grid.origin_y - r0 as f64 * grid.cell_size,
        grid.cell_size,
        cols.len(),
        rows.len(),
        grid.nodata,
    );
    clipped.format = grid.format;
    clipped.palette = grid.palette.clone();
    for (new_row, &row) in rows.iter().enumerate() {
        for (new_col, &col) in cols.iter().enumerate() {
            if let Some(value) = grid.get(col, row) {
                clipped.set(new_col, new_row, value);
            }
        }
    }
    Some(clipped)
}

/// Nearest-neighbour resample to `cell_size`.
pub fn resample_grid(grid: &ClassGrid, cell_size: f64) -> ClassGrid {
    let bounds = grid.bounds();
    let width = (bounds.width() / cell_size).ceil().max(1.0) as usize;
    let height = (bounds.height() / cell_size).ceil().max(1.0) as usize;
    let mut out = ClassGrid::filled(grid.origin_x, grid.origin_y, cell_size, width, height, grid.nodata);
    out.palette = grid.palette.clone();
    for row in 0..height {
        for col in 0..width {
            let (x, y) = out.cell_center(col, row);
            if let Some(value) = grid.sample(x, y) {
                out.set(col, row, value);
            }
        }
    }
    out
}

/// [`RasterProcessor`] over JSON grid files.
#[derive(Debug, Clone, Default)]
pub struct GridRaster;

impl GridRaster {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RasterProcessor for GridRaster {
    async fn build_mosaic(
        &self,
        inputs: &[PathBuf],
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        let grids = inputs
            .iter()
            .map(|p| ClassGrid::read(p))
            .collect::<Result<Vec<_>, _>>()?;
        let mut merged = merge_grids(&grids, nodata)?;
        merged.format = RasterFormat::GeoTiff;
        merged.write(output)
    }

    async fn clip(
        &self,
        input: &Path,
        boundary: &ClipBoundary,
        _nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        let extent = match boundary {
            ClipBoundary::Extent(extent) => extent,
            ClipBoundary::Shapefile(_) => {
                return Err(RasterError::Unsupported(
                    "grid backend clips to rectangular extents only".to_string(),
                ))
            }
        };
        let grid = ClassGrid::read(input)?;
        let mut clipped = clip_grid(&grid, extent).ok_or_else(|| RasterError::InvalidRaster {
            path: input.to_path_buf(),
            reason: format!("raster does not intersect clip boundary {}", boundary),
        })?;
        clipped.format = RasterFormat::Cog;
        clipped.write(output)
    }

    async fn resample(
        &self,
        input: &Path,
        cell_size: f64,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        if cell_size <= 0.0 {
            return Err(RasterError::Unsupported(format!("cell size {}", cell_size)));
        }
        let grid = ClassGrid::read(input)?;
        let mut resampled = resample_grid(&grid, cell_size);
        resampled.format = format;
        resampled.write(output)
    }

    async fn convert(
        &self,
        input: &Path,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        let mut grid = ClassGrid::read(input)?;
        grid.format = format;
        grid.write(output)
    }

    async fn apply_palette(
        &self,
        path: &Path,
        palette: &Palette,
        nodata: u8,
    ) -> Result<(), RasterError> {
        let mut grid = ClassGrid::read(path)?;
        grid.nodata = nodata;
        grid.palette = Some(palette.clone());
        grid.write(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(origin_x: f64, origin_y: f64, width: usize, height: usize, cells: Vec<u8>) -> ClassGrid {
        let mut g = ClassGrid::filled(origin_x, origin_y, 10.0, width, height, 0);
        g.cells = cells;
        g
    }

    #[test]
    fn test_merge_later_wins_except_nodata() {
        let earlier = grid(0.0, 20.0, 2, 2, vec![1, 1, 1, 1]);
        let later = grid(0.0, 20.0, 2, 2, vec![5, 0, 5, 5]);
        let merged = merge_grids(&[earlier, later], 0).unwrap();
        assert_eq!(merged.cells, vec![5, 1, 5, 5]);
    }

    #[test]
    fn test_merge_covers_union_of_footprints() {
        let west = grid(0.0, 10.0, 1, 1, vec![3]);
        let east = grid(20.0, 10.0, 1, 1, vec![4]);
        let merged = merge_grids(&[west, east], 0).unwrap();
        assert_eq!((merged.width, merged.height), (3, 1));
        assert_eq!(merged.cells, vec![3, 0, 4]);
    }

    #[test]
    fn test_merge_rejects_mixed_cell_sizes() {
        let a = grid(0.0, 10.0, 1, 1, vec![3]);
        let mut b = grid(0.0, 10.0, 1, 1, vec![3]);
        b.cell_size = 30.0;
        assert!(merge_grids(&[a, b], 0).is_err());
        assert!(matches!(merge_grids(&[], 0), Err(RasterError::NoInputs)));
    }

    #[test]
    fn test_clip_to_extent() {
        let g = grid(0.0, 20.0, 2, 2, vec![1, 2, 3, 4]);
        let clipped = clip_grid(&g, &BoundingBox::new(10.0, 0.0, 20.0, 20.0)).unwrap();
        assert_eq!((clipped.width, clipped.height), (1, 2));
        assert_eq!(clipped.cells, vec![2, 4]);
        assert!(clip_grid(&g, &BoundingBox::new(100.0, 100.0, 200.0, 200.0)).is_none());
    }

    #[test]
    fn test_resample_nearest_neighbour() {
        let g = grid(0.0, 30.0, 3, 3, vec![1, 1, 1, 1, 7, 1, 1, 1, 1]);
        let coarse = resample_grid(&g, 30.0);
        assert_eq!((coarse.width, coarse.height), (1, 1));
        assert_eq!(coarse.cells, vec![7]);
    }

    #[tokio::test]
    async fn test_processor_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        grid(0.0, 10.0, 1, 1, vec![2]).write(&a).unwrap();
        grid(10.0, 10.0, 1, 1, vec![6]).write(&b).unwrap();

        let raster = GridRaster::new();
        let out = dir.path().join("mosaic.tif");
        raster.build_mosaic(&[a, b], 0, &out).await.unwrap();
        let img = dir.path().join("mosaic.img");
        raster.convert(&out, RasterFormat::ErdasImagine, &img).await.unwrap();

        let converted = ClassGrid::read(&img).unwrap();
        assert_eq!(converted.format, RasterFormat::ErdasImagine);
        assert_eq!(converted.cells, vec![2, 6]);
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let raster = GridRaster::new();
        let err = raster
            .convert(&dir.path().join("none.tif"), RasterFormat::Cog, &dir.path().join("o.tif"))
            .await
            .unwrap_err();
        assert!(matches!(err, RasterError::MissingInput(_)));
    }
}
