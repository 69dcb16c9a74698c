//! Filesystem-backed blob storage.
//!
//! Treats a directory tree (for example a synced cloud-drive mount) as the
//! export destination. Folders are located by name anywhere below the root,
//! the way drive folders are searched by name rather than by path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{BlobRef, BlobStore};
use crate::error::BlobError;

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every directory below the root whose name is `folder`.
    fn find_folders(root: &Path, folder: &str) -> Vec<PathBuf> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir() && entry.file_name() == folder)
            .map(|entry| entry.into_path())
            .collect()
    }

    fn list_blocking(root: &Path, folder: &str, recursive: bool) -> Result<Vec<BlobRef>, BlobError> {
        if !root.is_dir() {
            return Err(BlobError::Unavailable(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }

        let mut blobs = Vec::new();
        for dir in Self::find_folders(root, folder) {
            let walker = if recursive {
                WalkDir::new(&dir).min_depth(1)
            } else {
                WalkDir::new(&dir).min_depth(1).max_depth(1)
            };
            for entry in walker.into_iter() {
                let entry = entry.map_err(|e| BlobError::Unavailable(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let size = entry.metadata().ok().map(|m| m.len());
                let name = entry.file_name().to_string_lossy().to_string();
                let path = entry
                    .path()
                    .strip_prefix(&dir)
                    .map(|rel| {
                        rel.components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/")
                    })
                    .unwrap_or_else(|_| name.clone());
                blobs.push(BlobRef {
                    id: entry.path().to_string_lossy().to_string(),
                    name,
                    path,
                    size,
                });
            }
        }
        blobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(blobs)
    }

    /// Removes empty directories below each matching folder, deepest first.
    /// The folders themselves are kept.
    fn prune_blocking(root: &Path, folder: &str) -> usize {
        let mut removed = 0usize;
        for dir in Self::find_folders(root, folder) {
            let subdirs = WalkDir::new(&dir)
                .min_depth(1)
                .contents_first(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_dir());
            for entry in subdirs {
                // Fails while the directory still holds something.
                if std::fs::remove_dir(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list_folder(&self, folder: &str, recursive: bool) -> Result<Vec<BlobRef>, BlobError> {
        let root = self.root.clone();
        let folder = folder.to_string();
        tokio::task::spawn_blocking(move || Self::list_blocking(&root, &folder, recursive))
            .await
            .map_err(|e| BlobError::Unavailable(format!("listing task failed: {}", e)))?
    }

    async fn download(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let path = Path::new(&blob.id);
        if !path.starts_with(&self.root) {
            return Err(BlobError::NotFound(blob.id.clone()));
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(blob.id.clone()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn delete_folder(&self, folder: &str) -> Result<usize, BlobError> {
        let blobs = self.list_folder(folder, true).await?;
        let mut deleted = 0usize;
        for blob in &blobs {
            match tokio::fs::remove_file(&blob.id).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(blob = %blob.name, "Deleted blob");
                }
                Err(e) => warn!(blob = %blob.name, error = %e, "Failed to delete blob"),
            }
        }

        let root = self.root.clone();
        let folder_name = folder.to_string();
        let pruned = tokio::task::spawn_blocking(move || Self::prune_blocking(&root, &folder_name))
            .await
            .map_err(|e| BlobError::Unavailable(format!("cleanup task failed: {}", e)))?;
        debug!(folder = folder, directories = pruned, "Removed empty directories");
        Ok(deleted)
    }
}
