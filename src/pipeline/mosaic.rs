//! Mosaic assembly for per-tile artifacts and for the cross-source product.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::retriever::Artifact;
use crate::error::MosaicError;
use crate::raster::{Palette, RasterProcessor};
use crate::source::SourceKind;

/// A merged raster on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MosaicProduct {
    pub path: PathBuf,
    /// `None` for the cross-source product.
    pub source: Option<SourceKind>,
    /// Number of rasters merged into it.
    pub inputs: usize,
}

pub struct MosaicAssembler {
    raster: Arc<dyn RasterProcessor>,
    nodata: u8,
    palette: Option<Palette>,
}

impl MosaicAssembler {
    pub fn new(raster: Arc<dyn RasterProcessor>, nodata: u8) -> Self {
        Self {
            raster,
            nodata,
            palette: None,
        }
    }

    /// Palette attached to the cross-source product.
    pub fn with_palette(mut self, palette: Option<Palette>) -> Self {
        self.palette = palette;
        self
    }

    /// Merges one source's artifacts into `output`. Artifacts are merged in
    /// tile-key order.
    pub async fn assemble(
        &self,
        artifacts: &[Artifact],
        output: &Path,
    ) -> Result<MosaicProduct, MosaicError> {
        if artifacts.is_empty() {
            return Err(MosaicError::build_failed(output, "no artifacts to merge"));
        }
        let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
        ordered.sort_by(|a, b| a.tile.cmp(&b.tile).then_with(|| a.path.cmp(&b.path)));
        let inputs: Vec<PathBuf> = ordered.iter().map(|a| a.path.clone()).collect();

        self.build(&inputs, output).await?;
        let source = ordered.first().map(|a| a.source);
        info!(
            source = ?source,
            tiles = inputs.len(),
            output = %output.display(),
            "Assembled source mosaic"
        );
        Ok(MosaicProduct {
            path: output.to_path_buf(),
            source,
            inputs: inputs.len(),
        })
    }

    /// Merges source mosaics, given in merge order, into the combined
    /// product and applies the palette.
    pub async fn merge_sources(
        &self,
        mosaics: &[MosaicProduct],
        output: &Path,
    ) -> Result<MosaicProduct, MosaicError> {
        if mosaics.is_empty() {
            return Err(MosaicError::build_failed(output, "no source mosaics to merge"));
        }
        let inputs: Vec<PathBuf> = mosaics.iter().map(|m| m.path.clone()).collect();
        self.build(&inputs, output).await?;

        if let Some(ref palette) = self.palette {
            if let Err(e) = self.raster.apply_palette(output, palette, self.nodata).await {
                warn!(output = %output.display(), error = %e, "Failed to apply palette");
            }
        }

        let sources: Vec<_> = mosaics.iter().filter_map(|m| m.source).collect();
        info!(sources = ?sources, output = %output.display(), "Merged source mosaics");
        Ok(MosaicProduct {
            path: output.to_path_buf(),
            source: None,
            inputs: inputs.len(),
        })
    }

    /// Builds into a hidden sibling and renames into place, so `output`
    /// exists only when the build succeeded.
    async fn build(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MosaicError> {
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| MosaicError::build_failed(output, "output path has no file name"))?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MosaicError::build_failed(output, e.to_string()))?;
        }
        let staging = output.with_file_name(format!(".{}.partial", file_name));

        if let Err(e) = self.raster.build_mosaic(inputs, self.nodata, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(MosaicError::build_failed(output, e.to_string()));
        }
        if let Err(e) = tokio::fs::rename(&staging, output).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(MosaicError::build_failed(output, e.to_string()));
        }
        Ok(())
    }
}
