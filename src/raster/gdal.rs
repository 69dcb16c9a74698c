//! GDAL command-line backend.
//!
//! Shells out to `gdalbuildvrt`, `gdal_translate` and `gdalwarp`. The tools
//! must be on `PATH` or under the configured binary directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClipBoundary, Palette, RasterFormat, RasterProcessor};
use crate::error::RasterError;

const BUILD_VRT: &str = "gdalbuildvrt";
const TRANSLATE: &str = "gdal_translate";
const WARP: &str = "gdalwarp";

#[derive(Debug, Clone, Default)]
pub struct GdalCli {
    bin_dir: Option<PathBuf>,
}

impl GdalCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks the tools up in `dir` instead of `PATH`.
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    fn program(&self, tool: &str) -> PathBuf {
        match self.bin_dir {
            Some(ref dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    async fn run_tool(&self, tool: &str, args: &[String]) -> Result<(), RasterError> {
        debug!(tool = tool, args = ?args, "Running GDAL tool");
        let output = Command::new(self.program(tool))
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RasterError::LaunchFailed {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RasterError::ToolFailed {
                tool: tool.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn require_input(path: &Path) -> Result<(), RasterError> {
    if path.exists() {
        Ok(())
    } else {
        Err(RasterError::MissingInput(path.to_path_buf()))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn creation_options(options: &[&str]) -> Vec<String> {
    options
        .iter()
        .flat_map(|opt| ["-co".to_string(), opt.to_string()])
        .collect()
}

/// Appends a suffix to the full file name: `a.tif` becomes `a.tif.vrt`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Inserts a palette color table into the first band of a VRT document.
pub(crate) fn inject_color_table(vrt: &str, palette: &Palette, nodata: u8) -> Option<String> {
    let band_start = vrt.find("<VRTRasterBand")?;
    let tag_end = band_start + vrt[band_start..].find('>')? + 1;

    let mut table = String::from("\n    <ColorInterp>Palette</ColorInterp>\n    <ColorTable>\n");
    let entries = palette.rgba_entries(nodata);
    let max_class = entries.last().map(|(class, _)| *class).unwrap_or(0);
    // GDAL color tables are dense; unlisted classes get opaque black.
    for class in 0..=max_class {
        let [r, g, b, a] = entries
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, rgba)| *rgba)
            .unwrap_or([0, 0, 0, 255]);
        table.push_str(&format!(
            "      <Entry c1=\"{}\" c2=\"{}\" c3=\"{}\" c4=\"{}\"/>\n",
            r, g, b, a
        ));
    }
    table.push_str("    </ColorTable>");

    let mut out = String::with_capacity(vrt.len() + table.len());
    out.push_str(&vrt[..tag_end]);
    out.push_str(&table);
    out.push_str(&vrt[tag_end..]);
    Some(out)
}

#[async_trait]
impl RasterProcessor for GdalCli {
    async fn build_mosaic(
        &self,
        inputs: &[PathBuf],
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        if inputs.is_empty() {
            return Err(RasterError::NoInputs);
        }
        for input in inputs {
            require_input(input)?;
        }

        let list = sibling(output, ".inputs.txt");
        let vrt = sibling(output, ".vrt");
        let listing: String = inputs.iter().map(|p| format!("{}\n", p.display())).collect();
        tokio::fs::write(&list, listing).await?;

        let vrt_args = vec![
            "-srcnodata".to_string(),
            nodata.to_string(),
            "-vrtnodata".to_string(),
            nodata.to_string(),
            "-input_file_list".to_string(),
            path_arg(&list),
            path_arg(&vrt),
        ];
        let built = self.run_tool(BUILD_VRT, &vrt_args).await;
        let _ = tokio::fs::remove_file(&list).await;
        built?;

        let mut args = vec!["-of".to_string(), RasterFormat::GeoTiff.gdal_driver().to_string()];
        args.extend(creation_options(&[
            "TILED=YES",
            "COMPRESS=LZW",
            "BIGTIFF=YES",
            "NUM_THREADS=ALL_CPUS",
        ]));
        args.push(path_arg(&vrt));
        args.push(path_arg(output));
        let translated = self.run_tool(TRANSLATE, &args).await;
        let _ = tokio::fs::remove_file(&vrt).await;
        translated?;

        info!(inputs = inputs.len(), output = %output.display(), "Built mosaic");
        Ok(())
    }

    async fn clip(
        &self,
        input: &Path,
        boundary: &ClipBoundary,
        nodata: u8,
        output: &Path,
    ) -> Result<(), RasterError> {
        require_input(input)?;

        let mut args = vec!["-of".to_string(), RasterFormat::Cog.gdal_driver().to_string()];
        match boundary {
            ClipBoundary::Shapefile(shp) => {
                require_input(shp)?;
                args.extend(["-cutline".to_string(), path_arg(shp), "-crop_to_cutline".to_string()]);
            }
            ClipBoundary::Extent(b) => {
                args.push("-te".to_string());
                args.extend([b.min_x, b.min_y, b.max_x, b.max_y].iter().map(|v| v.to_string()));
            }
        }
        args.extend(["-dstnodata".to_string(), nodata.to_string()]);
        args.extend(creation_options(&["COMPRESS=DEFLATE", "PREDICTOR=2", "BIGTIFF=IF_SAFER"]));
        args.extend([
            "-wo".to_string(),
            "NUM_THREADS=ALL_CPUS".to_string(),
            "-multi".to_string(),
            "-overwrite".to_string(),
            path_arg(input),
            path_arg(output),
        ]);
        self.run_tool(WARP, &args).await
    }

    async fn resample(
        &self,
        input: &Path,
        cell_size: f64,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        require_input(input)?;
        let mut args = vec![
            "-of".to_string(),
            format.gdal_driver().to_string(),
            "-tr".to_string(),
            cell_size.to_string(),
            cell_size.to_string(),
            "-r".to_string(),
            "near".to_string(),
        ];
        args.extend(creation_options(&["COMPRESS=LZW", "BIGTIFF=IF_SAFER"]));
        args.extend(["-overwrite".to_string(), path_arg(input), path_arg(output)]);
        self.run_tool(WARP, &args).await
    }

    async fn convert(
        &self,
        input: &Path,
        format: RasterFormat,
        output: &Path,
    ) -> Result<(), RasterError> {
        require_input(input)?;
        let mut args = vec!["-of".to_string(), format.gdal_driver().to_string()];
        match format {
            RasterFormat::ErdasImagine => args.extend(creation_options(&["COMPRESS=YES"])),
            RasterFormat::GeoTiff | RasterFormat::Cog => {
                args.extend(creation_options(&["COMPRESS=LZW", "BIGTIFF=IF_SAFER"]))
            }
        }
        args.extend([path_arg(input), path_arg(output)]);
        self.run_tool(TRANSLATE, &args).await
    }

    async fn apply_palette(
        &self,
        path: &Path,
        palette: &Palette,
        nodata: u8,
    ) -> Result<(), RasterError> {
        require_input(path)?;
        let vrt = sibling(path, ".palette.vrt");
        let staged = sibling(path, ".palette.tmp");

        let to_vrt = vec!["-of".to_string(), "VRT".to_string(), path_arg(path), path_arg(&vrt)];
        self.run_tool(TRANSLATE, &to_vrt).await?;

        let document = tokio::fs::read_to_string(&vrt).await?;
        let Some(colored) = inject_color_table(&document, palette, nodata) else {
            let _ = tokio::fs::remove_file(&vrt).await;
            return Err(RasterError::InvalidRaster {
                path: path.to_path_buf(),
                reason: "VRT has no raster band".to_string(),
            });
        };
        tokio::fs::write(&vrt, colored).await?;

        // Keep the source driver so the palette does not change the format.
        let driver = if path.extension().and_then(|e| e.to_str()) == Some("img") {
            RasterFormat::ErdasImagine
        } else {
            RasterFormat::GeoTiff
        };
        let mut back = vec!["-of".to_string(), driver.gdal_driver().to_string()];
        if driver == RasterFormat::GeoTiff {
            back.extend(creation_options(&["COMPRESS=LZW", "TILED=YES", "BIGTIFF=IF_SAFER"]));
        }
        back.extend([path_arg(&vrt), path_arg(&staged)]);
        let translated = self.run_tool(TRANSLATE, &back).await;
        let _ = tokio::fs::remove_file(&vrt).await;
        translated?;

        tokio::fs::rename(&staged, path).await?;
        debug!(path = %path.display(), classes = palette.entries.len(), "Applied palette");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_resolution() {
        assert_eq!(GdalCli::new().program(WARP), PathBuf::from("gdalwarp"));
        let cli = GdalCli::new().with_bin_dir("/opt/gdal/bin");
        assert_eq!(cli.program(WARP), PathBuf::from("/opt/gdal/bin/gdalwarp"));
    }

    #[test]
    fn test_sibling_keeps_full_name() {
        assert_eq!(
            sibling(Path::new("/out/a.tif"), ".vrt"),
            PathBuf::from("/out/a.tif.vrt")
        );
    }

    #[test]
    fn test_inject_color_table() {
        let vrt = "<VRTDataset>\n  <VRTRasterBand dataType=\"Byte\" band=\"1\">\n    <NoDataValue>0</NoDataValue>\n  </VRTRasterBand>\n</VRTDataset>";
        let palette = Palette::new().with_entry(2, [10, 20, 30]);
        let out = inject_color_table(vrt, &palette, 0).unwrap();

        assert!(out.contains("<ColorInterp>Palette</ColorInterp>"));
        assert_eq!(out.matches("<Entry ").count(), 3);
        assert!(out.contains("<Entry c1=\"255\" c2=\"255\" c3=\"255\" c4=\"0\"/>"));
        assert!(out.contains("<Entry c1=\"10\" c2=\"20\" c3=\"30\" c4=\"255\"/>"));
        let table_at = out.find("<ColorTable>").unwrap();
        assert!(table_at > out.find("<VRTRasterBand").unwrap());
        assert!(table_at < out.find("<NoDataValue>").unwrap());
    }

    #[test]
    fn test_inject_requires_band() {
        assert!(inject_color_table("<VRTDataset/>", &Palette::new(), 0).is_none());
    }

    #[tokio::test]
    async fn test_missing_tool_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tif");
        std::fs::write(&input, b"x").unwrap();

        let cli = GdalCli::new().with_bin_dir(dir.path().join("no-bin"));
        let err = cli
            .convert(&input, RasterFormat::ErdasImagine, &dir.path().join("out.img"))
            .await
            .unwrap_err();
        assert!(matches!(err, RasterError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_mosaic_without_inputs() {
        let err = GdalCli::new()
            .build_mosaic(&[], 0, Path::new("/tmp/never.tif"))
            .await
            .unwrap_err();
        assert!(matches!(err, RasterError::NoInputs));
    }
}
