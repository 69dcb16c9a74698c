//! Tiles and the imagery sources that partition them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Imagery source processed by one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Landsat 8/9 surface reflectance, tiled by WRS-2 path/row.
    Landsat,
    /// Sentinel-2 surface reflectance, tiled by MGRS grid cell.
    Sentinel,
}

impl SourceKind {
    /// Both sources, in cross-source merge order (later wins in overlaps).
    pub const ALL: [SourceKind; 2] = [SourceKind::Landsat, SourceKind::Sentinel];

    /// Short label used in file and folder names.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Landsat => "L89",
            SourceKind::Sentinel => "S2",
        }
    }

    /// Default maximum scene cloud cover, in percent.
    pub fn default_cloud_cover(&self) -> f64 {
        match self {
            SourceKind::Landsat => 15.0,
            SourceKind::Sentinel => 10.0,
        }
    }

    /// Default remote folder that classification exports are written to.
    pub fn default_export_folder(&self) -> &'static str {
        match self {
            SourceKind::Landsat => "AutoInseasonL89_Mapping",
            SourceKind::Sentinel => "AutoInseasonS2_Mapping",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Landsat => write!(f, "landsat"),
            SourceKind::Sentinel => write!(f, "sentinel"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "landsat" | "l89" => Ok(SourceKind::Landsat),
            "sentinel" | "s2" => Ok(SourceKind::Sentinel),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Source-specific identifier of a tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileKey {
    /// WRS-2 path/row pair.
    PathRow { path: u16, row: u16 },
    /// Grid cell identifier such as an MGRS tile (`14TPL`).
    Grid { id: String },
}

impl TileKey {
    pub fn path_row(path: u16, row: u16) -> Self {
        TileKey::PathRow { path, row }
    }

    pub fn grid(id: impl Into<String>) -> Self {
        TileKey::Grid { id: id.into() }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileKey::PathRow { path, row } => write!(f, "{}_{}", path, row),
            TileKey::Grid { id } => write!(f, "{}", id),
        }
    }
}

impl FromStr for TileKey {
    type Err = String;

    /// Parses the display form: `path_row` for WRS-2 keys, anything else
    /// alphanumeric for grid cells.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty tile key".to_string());
        }
        if let Some((path, row)) = s.split_once('_') {
            let path = path
                .parse::<u16>()
                .map_err(|_| format!("invalid WRS path in '{}'", s))?;
            let row = row
                .parse::<u16>()
                .map_err(|_| format!("invalid WRS row in '{}'", s))?;
            return Ok(TileKey::PathRow { path, row });
        }
        if s.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(TileKey::Grid { id: s.to_string() })
        } else {
            Err(format!("invalid grid tile id '{}'", s))
        }
    }
}

/// A spatial partition unit, immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    pub source: SourceKind,
    pub key: TileKey,
}

impl Tile {
    pub fn new(source: SourceKind, key: TileKey) -> Self {
        Self { source, key }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.label(), self.key)
    }
}
