//! Remote collaborators: the classification service and blob storage.
//!
//! Both are consumed through async traits so the pipeline can run against
//! real backends or scripted test doubles:
//!
//! - **ClassificationService**: tile catalog, lazy composites, training
//!   samples, job submission and status
//! - **BlobStore**: listing, download and deletion of exported rasters
//!
//! # Example
//!
//! ```rust,ignore
//! use inseason_mapper::remote::{HttpClassificationService, LocalBlobStore};
//!
//! let service = HttpClassificationService::from_env()?;
//! let store = LocalBlobStore::new("/mnt/drive/MyDrive");
//! ```

pub mod http;
pub mod local_store;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BlobError, ServiceError};
use crate::source::{DateWindow, Region, SourceKind, Tile, TileKey, TrainingLabels};

pub use http::HttpClassificationService;
pub use local_store::LocalBlobStore;

/// Opaque reference to one unit of remote asynchronous work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State reported by the remote service for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteState {
    /// Accepted, not started yet.
    Pending,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl RemoteState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteState::Completed | RemoteState::Failed(_) | RemoteState::Cancelled
        )
    }
}

/// Lazily evaluated feature composite for one tile. Nothing is materialized
/// locally; the footprint area comes from the composite's scene geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composite {
    pub tile: Tile,
    /// Remote reference to the lazy composite expression.
    pub reference: String,
    /// Area of the union of scene footprints, in square meters.
    pub footprint_area: f64,
    /// Number of scenes that passed the date and cloud filters.
    pub scene_count: usize,
}

impl Composite {
    pub fn has_footprint(&self) -> bool {
        self.footprint_area > 0.0
    }
}

/// Stratified training sample drawn against the trusted label raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    /// Remote reference to the sampled feature collection.
    pub reference: String,
    /// Number of sample points per label class.
    pub class_counts: BTreeMap<u32, usize>,
}

impl TrainingSample {
    pub fn total(&self) -> usize {
        self.class_counts.values().sum()
    }

    pub fn distinct_classes(&self) -> usize {
        self.class_counts.values().filter(|&&n| n > 0).count()
    }

    /// A classifier needs at least one point and at least two classes.
    pub fn is_usable(&self) -> bool {
        self.total() > 0 && self.distinct_classes() > 1
    }
}

/// Where and how a classification result is exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTarget {
    /// Remote folder receiving the raster.
    pub folder: String,
    /// File name stem of the exported raster.
    pub description: String,
    /// Output cell size in meters.
    pub scale: u32,
    pub crs: String,
}

/// Reference to one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Backend identifier used for download and delete.
    pub id: String,
    /// File name without folder components.
    pub name: String,
    /// `/`-separated path below the listed folder. Equals `name` for blobs
    /// at the top of the folder.
    #[serde(default)]
    pub path: String,
    pub size: Option<u64>,
}

impl BlobRef {
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Relative local path mirroring `path`. Falls back to the bare name
    /// unless every component of `path` is a plain name.
    pub fn local_path(&self) -> PathBuf {
        let relative = Path::new(&self.path);
        let plain = !self.path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if plain {
            relative.to_path_buf()
        } else {
            PathBuf::from(&self.name)
        }
    }
}

/// Remote classification service.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    /// Tiles with any scene coverage over `region` during `window`.
    async fn available_tiles(
        &self,
        source: SourceKind,
        region: &Region,
        window: &DateWindow,
    ) -> Result<Vec<TileKey>, ServiceError>;

    /// Builds the lazy feature composite of one tile.
    async fn composite(
        &self,
        tile: &Tile,
        window: &DateWindow,
        cloud_cover: f64,
    ) -> Result<Composite, ServiceError>;

    /// Draws a stratified training sample from the composite.
    async fn training_sample(
        &self,
        composite: &Composite,
        labels: &TrainingLabels,
    ) -> Result<TrainingSample, ServiceError>;

    /// Starts the classification and export job.
    async fn submit(
        &self,
        composite: &Composite,
        sample: &TrainingSample,
        target: &ExportTarget,
    ) -> Result<JobHandle, ServiceError>;

    async fn status(&self, handle: &JobHandle) -> Result<RemoteState, ServiceError>;
}

/// Remote file storage that classification exports land in.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Blobs in the folder named `folder`. A missing folder yields no blobs.
    async fn list_folder(&self, folder: &str, recursive: bool) -> Result<Vec<BlobRef>, BlobError>;

    async fn download(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;

    /// Removes every blob in the folder, returning how many were deleted.
    async fn delete_folder(&self, folder: &str) -> Result<usize, BlobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_sample_usability() {
        let mut sample = TrainingSample::default();
        assert!(!sample.is_usable());

        sample.class_counts.insert(1, 500);
        assert!(!sample.is_usable(), "single class must not be usable");

        sample.class_counts.insert(5, 0);
        assert!(!sample.is_usable(), "empty classes do not count");

        sample.class_counts.insert(24, 12);
        assert!(sample.is_usable());
        assert_eq!(sample.total(), 512);
    }

    #[test]
    fn test_remote_state_terminal() {
        assert!(!RemoteState::Pending.is_terminal());
        assert!(!RemoteState::Running.is_terminal());
        assert!(RemoteState::Completed.is_terminal());
        assert!(RemoteState::Failed("boom".into()).is_terminal());
        assert!(RemoteState::Cancelled.is_terminal());
    }

    #[test]
    fn test_remote_state_wire_format() {
        let state: RemoteState =
            serde_json::from_str(r#"{"state":"FAILED","message":"quota"}"#).unwrap();
        assert_eq!(state, RemoteState::Failed("quota".into()));
        let state: RemoteState = serde_json::from_str(r#"{"state":"COMPLETED"}"#).unwrap();
        assert_eq!(state, RemoteState::Completed);
    }

    #[test]
    fn test_blob_extension() {
        let blob = BlobRef {
            id: "x".into(),
            name: "June_18_33_2025-07-01.tif".into(),
            path: "June_18_33_2025-07-01.tif".into(),
            size: None,
        };
        assert_eq!(blob.extension(), Some("tif"));
    }

    #[test]
    fn test_blob_local_path() {
        let nested = BlobRef {
            id: "x".into(),
            name: "a.tif".into(),
            path: "part-1/a.tif".into(),
            size: None,
        };
        assert_eq!(nested.local_path(), PathBuf::from("part-1").join("a.tif"));

        for path in ["../a.tif", "/tmp/a.tif", ""] {
            let blob = BlobRef {
                path: path.into(),
                ..nested.clone()
            };
            assert_eq!(blob.local_path(), PathBuf::from("a.tif"), "path {:?}", path);
        }
    }
}
