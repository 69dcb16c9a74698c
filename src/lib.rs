//! inseason-mapper: in-season crop map production.
//!
//! Submits one remote classification job per imagery tile, polls the jobs to
//! completion, downloads the exported rasters and assembles them into the
//! monthly crop map products.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod raster;
pub mod remote;
pub mod source;

// Re-export commonly used error types
pub use error::{
    BlobError, CatalogError, MosaicError, RasterError, RetrieveError, RunError, ServiceError,
};
