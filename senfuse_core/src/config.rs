//! Run configuration for the fusion engine and scene database.

use crate::error::{FusionError, Result};
use half::f16;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// How sample points are mapped to voxel indices by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One voxel per sample point
    NearestNeighbor,

    /// The eight lattice corners surrounding the sample point
    TrilinearInterpolation,
}

impl ExtractionStrategy {
    /// Number of voxel indices emitted per sample point.
    pub fn replication(self) -> usize {
        match self {
            ExtractionStrategy::NearestNeighbor => 1,
            ExtractionStrategy::TrilinearInterpolation => 8,
        }
    }

    /// Returns the configuration name.
    pub fn name(self) -> &'static str {
        match self {
            ExtractionStrategy::NearestNeighbor => "nearest_neighbor",
            ExtractionStrategy::TrilinearInterpolation => "trilinear_interpolation",
        }
    }
}

impl std::str::FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest_neighbor" | "nn" => Ok(ExtractionStrategy::NearestNeighbor),
            "trilinear_interpolation" | "trilinear" => Ok(ExtractionStrategy::TrilinearInterpolation),
            _ => Err(format!("Unknown extraction strategy: {}", s)),
        }
    }
}

/// Configuration shared by the integrator and the scene database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Ceiling for the running-average weight (default: 500, at most `f16::MAX`)
    pub max_weight: f32,

    /// Voxel extraction strategy used by the producer
    pub extraction_strategy: ExtractionStrategy,

    /// Expose surface + a tenth of the empty-space set instead of the border-filtered set
    pub train_on_border_voxels: bool,

    /// Feature channel width `F`
    pub n_features: usize,

    /// Erode evaluation masks by one voxel
    pub erosion: bool,

    /// Track refined TSDF grids (test mode only)
    pub outlier_filter: bool,

    /// Evaluation configuration: allocates sensor weighting grids
    pub test_mode: bool,

    /// Sensor names, in configuration order
    pub sensors: Vec<String>,

    /// Sentinel value for uninitialized TSDF voxels
    pub init_value: f32,

    /// Truncation distance; ground truth is expected already clamped to it by the producer
    pub trunc_value: f32,

    /// Persist the feature grids on save
    pub persist_features: bool,

    /// Two-channel sensor weighting for two-sensor test runs
    pub outlier_channel: bool,

    /// Ground truth carries a proxy sensor weighting grid
    pub alpha_supervision: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_weight: 500.0,
            extraction_strategy: ExtractionStrategy::TrilinearInterpolation,
            train_on_border_voxels: false,
            n_features: 5,
            erosion: true,
            outlier_filter: false,
            test_mode: false,
            sensors: vec!["tof".to_string(), "stereo".to_string()],
            init_value: 0.1,
            trunc_value: 0.1,
            persist_features: true,
            outlier_channel: false,
            alpha_supervision: false,
        }
    }
}

impl FusionConfig {
    /// Sets the sensor list.
    pub fn with_sensors<I, S>(mut self, sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensors = sensors.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the extraction strategy.
    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.extraction_strategy = strategy;
        self
    }

    /// Enables evaluation-mode grids.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Whether refined TSDF grids are allocated.
    pub fn tracks_refined(&self) -> bool {
        self.outlier_filter && self.test_mode
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_weight > 0.0) || !self.max_weight.is_finite() {
            return Err(FusionError::config(format!(
                "max_weight must be positive and finite, got {}",
                self.max_weight
            )));
        }
        if self.max_weight > f16::MAX.to_f32() {
            return Err(FusionError::config(format!(
                "max_weight {} exceeds the largest storable weight {}",
                self.max_weight,
                f16::MAX
            )));
        }
        if self.n_features == 0 {
            return Err(FusionError::config("n_features must be at least 1"));
        }
        if self.sensors.is_empty() {
            return Err(FusionError::config("at least one sensor is required"));
        }
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.as_str()) {
                return Err(FusionError::config(format!("duplicate sensor: {}", sensor)));
            }
        }
        if !self.init_value.is_finite() || !self.trunc_value.is_finite() {
            return Err(FusionError::config("init_value and trunc_value must be finite"));
        }
        Ok(())
    }

    /// Loads a configuration from a JSON file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: FusionConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
