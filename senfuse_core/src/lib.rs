//! SenFuse Core - Incremental Sparse Voxel TSDF Fusion
//!
//! Fuses per-frame, per-sensor depth evidence into persistent per-scene
//! signed-distance grids:
//! 1. **Sparse reduction**: colliding voxel indices inside one batch are
//!    coalesced by sorted linear key before any grid is touched
//! 2. **Running average**: distance, feature and empty-space evidence merge
//!    into half-precision grids under a weight ceiling
//! 3. **Scene database**: per-scene, per-sensor grid ownership with reset,
//!    persistence, oracle sensor weighting and evaluation against ground truth

pub mod batch;
pub mod config;
pub mod database;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod mask;
pub mod metrics;
pub mod persistence;
pub mod proxy;
pub mod reducer;

// Re-export key types for convenience
pub use batch::{BatchBuilder, FusionUpdateBatch};
pub use config::{ExtractionStrategy, FusionConfig};
pub use database::{GroundTruthScene, SceneDatabase, SceneView, SensorState, SensorWeighting};
pub use error::{FusionError, Result};
pub use grid::{BoundingBox, VoxelGrid, VoxelIndex};
pub use integrator::{FusionTarget, IntegrationOutcome, Integrator};
pub use metrics::{EvalMetrics, EvalMode, EvaluationReport, SceneEvaluation};
