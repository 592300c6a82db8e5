//! # Grid-level demand statistics
//!
//! ERCOT system-load data (a 4-day-ahead forecast and the recorded actual
//! load) plus the average draw of a single household, all as minute
//! profiles. The household count is the scale reference: demand for a
//! simulated population of H houses is `demand * (H / household_count)`.

use std::path::Path;

use anyhow::Result;

use crate::profile::Profile;

/// Households behind the ERCOT system-load numbers.
pub const ERCOT_HOUSEHOLDS: f64 = 9_500_000.0;

#[derive(Debug, Clone)]
pub struct GridDemandStatistics {
    pub household_count: f64,
    pub demand: Profile,
}

impl GridDemandStatistics {
    pub fn load(path: &Path, household_count: f64) -> Result<Self> {
        Ok(Self {
            household_count,
            demand: Profile::from_csv(path)?,
        })
    }
}
