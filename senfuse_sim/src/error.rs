//! Error types for the simulation harness.

use senfuse_core::FusionError;
use thiserror::Error;

/// Errors that abort a simulated run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The fusion engine rejected a batch or a database operation
    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),

    /// A sensor model with unusable parameters
    #[error("Invalid sensor model {name}: {reason}")]
    InvalidSensor { name: String, reason: String },

    /// Unknown or unsupported scenario request
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Creates an InvalidSensor error.
    pub fn sensor(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SimError::InvalidSensor {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for simulation operations.
pub type SimResult<T> = std::result::Result<T, SimError>;
