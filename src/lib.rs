// Library interface for the pacers modules
// This allows integration tests to access the core functionality

pub mod config;
pub mod decay;
pub mod error;
pub mod hrv;
pub mod import;
pub mod logging;
pub mod models;
pub mod optimizer;
pub mod predictor;
pub mod simulator;
pub mod sleep;

// Re-export commonly used types for convenience
pub use models::*;
pub use error::{PacersError, Result};
pub use config::AppConfig;
pub use logging::{LogConfig, LogLevel, LogFormat};
pub use optimizer::auto_fit;
pub use predictor::Predictor;
pub use simulator::{Anchor, EnergySimulator};
