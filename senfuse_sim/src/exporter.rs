//! JSON exporter for simulated fusion runs.
//!
//! Exports per-integration statistics and the final evaluation report.

use crate::error::SimResult;
use senfuse_core::{EvaluationReport, IntegrationOutcome};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Statistics of one integration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: usize,
    pub scene: String,
    pub sensor: String,

    /// Surface sample points in the batch
    pub samples: usize,

    pub surface_updates: usize,
    pub empty_updates: usize,
    pub feature_updates: usize,
    pub dropped: usize,

    /// Size of the returned active index set
    pub active_voxels: usize,
}

impl FrameRecord {
    pub fn new(
        frame: usize,
        scene: &str,
        sensor: &str,
        samples: usize,
        outcome: &IntegrationOutcome,
    ) -> Self {
        Self {
            frame,
            scene: scene.to_string(),
            sensor: sensor.to_string(),
            samples,
            surface_updates: outcome.surface_updates,
            empty_updates: outcome.empty_updates,
            feature_updates: outcome.feature_updates,
            dropped: outcome.dropped,
            active_voxels: outcome.active_indices.len(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All integration calls, in order
    pub frames: Vec<FrameRecord>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<EvaluationReport>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub saved_files: Vec<PathBuf>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            report: None,
            saved_files: Vec::new(),
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: FrameRecord) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, report: Option<EvaluationReport>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.report = report;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
