//! Date windows and the run label used to name products.

use std::fmt;

use chrono::{Datelike, Month, NaiveDate};
use serde::{Deserialize, Serialize};

/// Half-open date range `[start, end)` used to filter scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Creates a window, rejecting `start >= end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start >= end {
            return Err(format!(
                "window start {} must be before end {}",
                start, end
            ));
        }
        Ok(Self { start, end })
    }

    /// Growing-season window for `year`: May 1st up to `end`.
    pub fn season_to_date(year: i32, end: NaiveDate) -> Result<Self, String> {
        let start = NaiveDate::from_ymd_opt(year, 5, 1)
            .ok_or_else(|| format!("invalid year {}", year))?;
        Self::new(start, end)
    }

    /// Short reference window used only to discover tile coverage (May 1-20).
    pub fn catalog_reference(year: i32) -> Result<Self, String> {
        let start = NaiveDate::from_ymd_opt(year, 5, 1)
            .ok_or_else(|| format!("invalid year {}", year))?;
        let end = NaiveDate::from_ymd_opt(year, 5, 20)
            .ok_or_else(|| format!("invalid year {}", year))?;
        Self::new(start, end)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Year and month naming every product of a run, e.g. `2025June`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLabel {
    pub year: i32,
    pub month: u32,
}

impl RunLabel {
    pub fn new(year: i32, month: u32) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("invalid month {}", month));
        }
        Ok(Self { year, month })
    }

    /// Label for a run started on `date`: the month preceding it.
    pub fn previous_month(date: NaiveDate) -> Self {
        if date.month() == 1 {
            Self {
                year: date.year() - 1,
                month: 12,
            }
        } else {
            Self {
                year: date.year(),
                month: date.month() - 1,
            }
        }
    }

    /// English month name (`June`).
    pub fn month_name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("Unknown")
    }

    /// `{year}{Month}` prefix shared by all product names.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.year, self.month_name())
    }

    /// Name of one source's intermediate mosaic.
    pub fn source_mosaic_name(&self, source_label: &str) -> String {
        format!("{}_{}mosaic.tif", self.prefix(), source_label)
    }

    /// Name of the cross-source combined mosaic.
    pub fn combined_mosaic_name(&self) -> String {
        format!("{}CropMapMosaiced.tif", self.prefix())
    }

    /// Name of a final product at `cell_size` meters with the given extension.
    pub fn product_name(&self, cell_size: u32, extension: &str) -> String {
        format!("{}CropMap{}m.{}", self.prefix(), cell_size, extension)
    }

    /// Remote export description for one tile: `{Month}_{tile}_{end}`.
    pub fn export_description(&self, tile_key: &str, window_end: NaiveDate) -> String {
        format!("{}_{}_{}", self.month_name(), tile_key, window_end)
    }
}

impl fmt::Display for RunLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}
