//! Tile enumeration against the remote availability index.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::CatalogError;
use crate::remote::ClassificationService;
use crate::source::{DateWindow, Region, SourceKind, Tile};

pub struct TileCatalog {
    service: Arc<dyn ClassificationService>,
}

impl TileCatalog {
    pub fn new(service: Arc<dyn ClassificationService>) -> Self {
        Self { service }
    }

    /// Tiles of `source` with any coverage over `region` during the short
    /// `reference` window. Keys are unique and sorted; `max_tiles` truncates
    /// the sorted list.
    pub async fn enumerate(
        &self,
        source: SourceKind,
        region: &Region,
        reference: &DateWindow,
        max_tiles: Option<usize>,
    ) -> Result<Vec<Tile>, CatalogError> {
        let keys = self
            .service
            .available_tiles(source, region, reference)
            .await
            .map_err(CatalogError::CatalogUnavailable)?;

        let reported = keys.len();
        let unique: BTreeSet<_> = keys.into_iter().collect();
        if unique.len() < reported {
            warn!(
                source = %source,
                duplicates = reported - unique.len(),
                "Catalog reported duplicate tile keys"
            );
        }

        let mut tiles: Vec<Tile> = unique.into_iter().map(|k| Tile::new(source, k)).collect();
        if let Some(limit) = max_tiles {
            tiles.truncate(limit);
        }

        info!(
            source = %source,
            region = %region.name,
            window = %reference,
            tiles = tiles.len(),
            "Enumerated tiles"
        );
        Ok(tiles)
    }
}
