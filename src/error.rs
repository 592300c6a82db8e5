use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Failures the simulation core can surface.
///
/// Everything here is fatal: the driver converts any of these into a single
/// diagnostic on stderr and exit code 1. Loader-level I/O problems are wrapped
/// with `anyhow::Context` instead and funnel into the same exit path.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing {class} statistics for {date}")]
    MissingStatistics { class: String, date: NaiveDate },

    #[error("Malformed dataset {path}: {reason}")]
    MalformedDataset { path: PathBuf, reason: String },
}

impl SimError {
    pub fn missing(class: &str, date: NaiveDate) -> Self {
        SimError::MissingStatistics {
            class: class.to_string(),
            date,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SimError::MalformedDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
