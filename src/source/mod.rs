//! Domain vocabulary shared by every pipeline stage.
//!
//! - **SourceKind / Tile / TileKey**: what gets partitioned and processed
//! - **DateWindow / RunLabel**: when, and how products are named
//! - **Region / BoundingBox**: where
//! - **TrainingLabels**: which historical label years train the classifier

pub mod calendar;
pub mod labels;
pub mod region;
pub mod tile;

pub use calendar::{DateWindow, RunLabel};
pub use labels::{TrainingLabels, DEFAULT_HISTORY_GAP};
pub use region::{BoundingBox, Region};
pub use tile::{SourceKind, Tile, TileKey};
