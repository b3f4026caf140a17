//! Error types for the SenFuse fusion engine.

use thiserror::Error;

/// Errors that can occur while building, fusing, persisting or evaluating grids.
///
/// Only contract violations and I/O failures surface here. Out-of-bounds
/// samples and empty update sets are absorbed by the reducer.
#[derive(Debug, Error)]
pub enum FusionError {
    /// A grid was given data of the wrong shape
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Parallel arrays of an update batch disagree in length
    #[error("Length mismatch in `{field}`: expected {expected}, got {got}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// Feature vectors do not have the configured width
    #[error("Feature width mismatch: expected {expected}, got {got}")]
    FeatureWidth { expected: usize, got: usize },

    /// Direct grid access outside the lattice
    #[error("Index {index:?} out of bounds for grid of shape {shape:?}")]
    IndexOutOfBounds { index: [i64; 3], shape: [usize; 3] },

    /// Scene id is not known to the database
    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    /// Sensor name is not part of the configuration
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisted file is malformed
    #[error("Format error: {0}")]
    Format(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FusionError {
    /// Creates a length mismatch error.
    pub fn length(field: &'static str, expected: usize, got: usize) -> Self {
        Self::LengthMismatch { field, expected, got }
    }

    /// Creates an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Creates an unknown scene error.
    pub fn unknown_scene(scene: impl std::fmt::Display) -> Self {
        Self::UnknownScene(scene.to_string())
    }

    /// Creates an unknown sensor error.
    pub fn unknown_sensor(sensor: impl std::fmt::Display) -> Self {
        Self::UnknownSensor(sensor.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FusionError>;
