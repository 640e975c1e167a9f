//! Unified error hierarchy for pacers
//!
//! The estimation engine itself favors silent degradation: bad parameter
//! combinations become infinite loss, missing data becomes empty output or
//! explicit defaults. Errors here cover the conditions that are genuinely
//! the caller's fault (malformed inputs) or environmental (I/O, parsing,
//! configuration).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all pacers operations
#[derive(Debug, Error)]
pub enum PacersError {
    /// Input construction violated a model invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Import/export errors
    #[error("Import/Export error: {0}")]
    ImportExport(#[from] ImportExportError),

    /// Calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Import and export errors
#[derive(Debug, Error)]
pub enum ImportExportError {
    /// Format-specific parsing error
    #[error("Parse error in {format}: {reason}")]
    ParseError { format: String, reason: String },

    /// Missing required data
    #[error("Missing required data: {field}")]
    MissingData { field: String },

    /// File not found at specified path
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalculationError {
    /// Insufficient data for calculation
    #[error("Insufficient data for {calculation}: {reason}")]
    InsufficientData { calculation: String, reason: String },

    /// Invalid parameter
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },
}

/// Result type alias for pacers operations
pub type Result<T> = std::result::Result<T, PacersError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PacersError::Validation("cycle_end <= cycle_start".to_string());
        assert!(err.to_string().contains("Validation"));

        let err = PacersError::Calculation(CalculationError::InsufficientData {
            calculation: "auto_fit".to_string(),
            reason: "no aggregated samples".to_string(),
        });
        assert!(err.to_string().contains("auto_fit"));
    }
}
