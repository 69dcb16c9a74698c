//! Trusted training label descriptor.
//!
//! Training labels come from historical crop-type layers: a pixel is trusted
//! when its class stayed constant across the consecutive history years, or
//! across the alternate-year subset. The raster work happens remotely; this
//! type only fixes which years are compared.

use serde::{Deserialize, Serialize};

/// Default number of years spanned by the label history, including the
/// reference year.
pub const DEFAULT_HISTORY_GAP: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingLabels {
    /// Year the labels are predicted for.
    pub reference_year: i32,
    /// History span in years, including the reference year.
    pub history_gap: u32,
}

impl TrainingLabels {
    pub fn new(reference_year: i32, history_gap: u32) -> Result<Self, String> {
        if history_gap < 2 {
            return Err(format!(
                "history gap must be at least 2 years, got {}",
                history_gap
            ));
        }
        Ok(Self {
            reference_year,
            history_gap,
        })
    }

    /// Consecutive history years, oldest first, excluding the reference year.
    pub fn consecutive_years(&self) -> Vec<i32> {
        let span = (self.history_gap - 1) as i32;
        (self.reference_year - span..self.reference_year).collect()
    }

    /// Every second history year starting with the oldest.
    pub fn alternate_years(&self) -> Vec<i32> {
        self.consecutive_years().into_iter().step_by(2).collect()
    }
}
