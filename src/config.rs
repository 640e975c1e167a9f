//! Application configuration
//!
//! A single TOML file bundling the tunable parts of the pipeline: sleep
//! detection thresholds, simulation timing, HRV modulation, and the
//! auto-fit defaults. Everything has a sensible default so a missing file
//! just means "stock configuration".

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PacersError, Result};
use crate::models::{AggregationMethod, EnergyConfig, FitRange, HrvConfig, SleepConfig};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Sleep detection thresholds
    pub sleep: SleepConfig,

    /// Simulation timing
    pub energy: EnergyConfig,

    /// HRV drain modulation
    pub hrv: HrvConfig,

    /// Auto-fit defaults
    pub fit: FitSettings,
}

/// Auto-fit defaults used when the CLI flags are not given
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitSettings {
    /// Time range of cycles to fit
    pub range: FitRange,

    /// Statistic combining per-cycle fits
    pub method: AggregationMethod,
}

impl Default for FitSettings {
    fn default() -> Self {
        FitSettings {
            range: FitRange::All,
            method: AggregationMethod::Median,
        }
    }
}

impl AppConfig {
    /// Default configuration file location
    /// (`~/.config/pacers/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pacers").join("config.toml"))
    }

    /// Load from a TOML file; a missing file yields the default config
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| PacersError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Save as TOML, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PacersError::Configuration(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}
