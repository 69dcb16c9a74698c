//! Command-line interface for inseason-mapper.
//!
//! Provides the `run` command for a full mapping run and the `tiles`
//! command for inspecting the tile catalog.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RasterBackend};
