//! Artifact download from the remote export folder.
//!
//! Export names follow `{Month}_{tile}_{end-date}`, optionally with the
//! `-NNNNNNNNNN-NNNNNNNNNN` suffix added when the remote service splits a
//! large export into pieces. A blob already present locally with the same
//! size is reused rather than downloaded again, so a second fetch of an
//! unchanged folder performs no writes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::RetrieveConfig;
use crate::error::RetrieveError;
use crate::metrics::MetricsCollector;
use crate::remote::{BlobRef, BlobStore};
use crate::source::{SourceKind, TileKey};

static EXPORT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<month>[A-Za-z]+)_(?P<tile>[0-9]+_[0-9]+|[0-9A-Za-z]+)_(?P<date>\d{4}-\d{2}-\d{2})(?:-\d+-\d+)?\.[A-Za-z]+$",
    )
    .expect("Invalid regex for export names")
});

/// Tile key encoded in an export file name.
pub fn parse_export_name(name: &str) -> Option<TileKey> {
    let captures = EXPORT_NAME.captures(name)?;
    captures.name("tile")?.as_str().parse().ok()
}

/// A downloaded raster for one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub tile: TileKey,
    pub source: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub blob: String,
    pub reason: String,
}

/// Result of one fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    /// Artifacts written by this fetch.
    pub downloaded: Vec<Artifact>,
    /// Artifacts already present locally.
    pub reused: Vec<Artifact>,
    pub failures: Vec<FetchFailure>,
    /// Blobs skipped for their extension or name.
    pub ignored: usize,
}

impl FetchReport {
    /// Every artifact available locally after the fetch.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.downloaded.iter().chain(self.reused.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.downloaded.is_empty() && self.reused.is_empty()
    }
}

pub struct ArtifactRetriever {
    store: Arc<dyn BlobStore>,
    config: RetrieveConfig,
    metrics: MetricsCollector,
}

impl ArtifactRetriever {
    pub fn new(store: Arc<dyn BlobStore>, config: RetrieveConfig) -> Self {
        Self {
            store,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Downloads every raster blob of `folder` (recursively) into `local_dir`.
    ///
    /// An empty or missing remote folder is not an error. Per-blob failures
    /// are collected in the report and the remaining blobs still download.
    pub async fn fetch(
        &self,
        source: SourceKind,
        folder: &str,
        local_dir: &Path,
    ) -> Result<FetchReport, RetrieveError> {
        let blobs = self
            .store
            .list_folder(folder, true)
            .await
            .map_err(|source| RetrieveError::ListingFailed {
                folder: folder.to_string(),
                source,
            })?;

        let mut report = FetchReport::default();
        let candidates: Vec<(BlobRef, TileKey)> = blobs
            .into_iter()
            .filter_map(|blob| {
                if !self.config.accepts(&blob.name) {
                    report.ignored += 1;
                    return None;
                }
                match parse_export_name(&blob.name) {
                    Some(tile) => Some((blob, tile)),
                    None => {
                        debug!(blob = %blob.name, "Ignoring blob with unrecognised name");
                        report.ignored += 1;
                        None
                    }
                }
            })
            .collect();

        if candidates.is_empty() {
            info!(source = %source, folder = folder, "No artifacts in remote folder");
            return Ok(report);
        }

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| RetrieveError::LocalFolder(local_dir.to_path_buf(), e))?;

        let label = source.to_string();
        let mut downloads = 0usize;
        for (blob, tile) in candidates {
            let path = local_dir.join(blob.local_path());
            let artifact = Artifact {
                path: path.clone(),
                tile,
                source,
            };

            if already_present(&path, blob.size).await {
                debug!(blob = %blob.name, "Reusing local copy");
                self.metrics.record_download(&label, "reused", 0);
                report.reused.push(artifact);
                continue;
            }

            if downloads > 0 && !self.config.download_interval.is_zero() {
                tokio::time::sleep(self.config.download_interval).await;
            }
            downloads += 1;

            match self.download_one(&blob, &path).await {
                Ok(bytes) => {
                    debug!(blob = %blob.name, bytes = bytes, "Downloaded artifact");
                    self.metrics.record_download(&label, "downloaded", bytes);
                    report.downloaded.push(artifact);
                }
                Err(reason) => {
                    warn!(source = %source, blob = %blob.name, error = %reason, "Download failed");
                    self.metrics.record_download(&label, "failed", 0);
                    report.failures.push(FetchFailure {
                        blob: blob.name.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            source = %source,
            folder = folder,
            downloaded = report.downloaded.len(),
            reused = report.reused.len(),
            failed = report.failures.len(),
            "Fetch finished"
        );
        Ok(report)
    }

    /// Writes through a `.part` file so an interrupted download never looks
    /// complete.
    async fn download_one(&self, blob: &BlobRef, path: &Path) -> Result<u64, String> {
        let bytes = self.store.download(blob).await.map_err(|e| e.to_string())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        let mut partial = path.as_os_str().to_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        if let Err(e) = tokio::fs::write(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.to_string());
        }
        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(bytes.len() as u64)
    }
}

async fn already_present(path: &Path, remote_size: Option<u64>) -> bool {
    match (tokio::fs::metadata(path).await, remote_size) {
        (Ok(meta), Some(size)) => meta.is_file() && meta.len() == size,
        // Without a remote size, any existing non-empty file counts.
        (Ok(meta), None) => meta.is_file() && meta.len() > 0,
        (Err(_), _) => false,
    }
}
