//! CSV ingestion of heart-rate samples and validated energy observations
//!
//! Two simple formats, both with a header row and RFC 3339 timestamps:
//!
//! ```text
//! timestamp,bpm
//! 2023-11-14T08:00:00Z,72.5
//! ```
//!
//! ```text
//! timestamp,percentage,validation
//! 2023-11-14T08:00:00Z,65.0,confirmed
//! ```
//!
//! The `validation` column is optional. Rows that fail validation (energy
//! outside [0, 100]) are errors, not silently dropped: a corrupt export
//! should be noticed, not averaged over.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ImportExportError, PacersError, Result};
use crate::models::{EnergyObservation, HrSample};

#[derive(Debug, Deserialize)]
struct HrRecord {
    timestamp: DateTime<Utc>,
    bpm: f64,
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    timestamp: DateTime<Utc>,
    percentage: f64,
    #[serde(default)]
    validation: Option<String>,
}

/// Read heart-rate samples from a CSV file, sorted by timestamp
pub fn read_hr_csv(path: &Path) -> Result<Vec<HrSample>> {
    if !path.exists() {
        return Err(ImportExportError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error("heart rate", e))?;
    let mut samples = Vec::new();

    for record in reader.deserialize::<HrRecord>() {
        let record = record.map_err(|e| csv_error("heart rate", e))?;
        samples.push(HrSample::new(record.timestamp, record.bpm));
    }

    samples.sort_by_key(|s| s.timestamp);
    debug!(count = samples.len(), path = %path.display(), "imported heart-rate samples");
    Ok(samples)
}

/// Read validated energy observations from a CSV file, sorted by timestamp
pub fn read_observations_csv(path: &Path) -> Result<Vec<EnergyObservation>> {
    if !path.exists() {
        return Err(ImportExportError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error("energy", e))?;
    let mut observations = Vec::new();

    for record in reader.deserialize::<ObservationRecord>() {
        let record = record.map_err(|e| csv_error("energy", e))?;
        observations.push(EnergyObservation::new(
            record.timestamp,
            record.percentage,
            record.validation,
        )?);
    }

    observations.sort_by_key(|o| o.timestamp);
    debug!(count = observations.len(), path = %path.display(), "imported energy observations");
    Ok(observations)
}

fn csv_error(format: &str, error: csv::Error) -> PacersError {
    ImportExportError::ParseError {
        format: format!("{} csv", format),
        reason: error.to_string(),
    }
    .into()
}
