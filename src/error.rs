//! Error types for in-season mapping operations.
//!
//! Defines error types for every subsystem of a mapping run:
//! - Remote classification service calls
//! - Blob storage listing, download and deletion
//! - Raster processing (mosaic, clip, resample, convert)
//! - Tile catalog enumeration
//! - Artifact retrieval and mosaic assembly
//! - The run as a whole

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a remote classification service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse service response: {0}")]
    ParseError(String),

    #[error("Unknown job handle: {0}")]
    UnknownJob(String),

    #[error("Missing API base URL: CLASSIFIER_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Service rejected request: {0}")]
    Rejected(String),
}

/// Errors returned by a blob storage backend.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob '{0}' not found")]
    NotFound(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to delete '{name}': {reason}")]
    DeleteFailed { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a raster processing backend.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Input raster not found: {0}")]
    MissingInput(PathBuf),

    #[error("No input rasters supplied")]
    NoInputs,

    #[error("Tool '{tool}' failed with status {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to launch '{tool}': {reason}")]
    LaunchFailed { tool: String, reason: String },

    #[error("Invalid raster '{path}': {reason}")]
    InvalidRaster { path: PathBuf, reason: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while enumerating tiles.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Tile catalog unavailable: {0}")]
    CatalogUnavailable(#[source] ServiceError),
}

/// Errors that can occur while retrieving artifacts.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("Failed to list remote folder '{folder}': {source}")]
    ListingFailed {
        folder: String,
        #[source]
        source: BlobError,
    },

    #[error("Failed to prepare local folder {0:?}: {1}")]
    LocalFolder(PathBuf, #[source] std::io::Error),
}

/// Errors that can occur while assembling a mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("Mosaic build failed for {output:?}: {reason}")]
    MosaicBuildFailed { output: PathBuf, reason: String },
}

impl MosaicError {
    pub(crate) fn build_failed(output: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MosaicError::MosaicBuildFailed {
            output: output.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that end a mapping run without a final product.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::ConfigError),

    #[error("No source pipeline produced a mosaic")]
    NoSourceMosaic,

    #[error("Post-processing failed: {0}")]
    StageFailed(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
