//! SenFuse Deterministic Fusion Simulation Harness
//!
//! Drives the fusion engine with synthetic depth sensors over analytic
//! scenes, so every run is reproducible from one 64-bit seed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌───────────┐    ┌─────────────┐    ┌──────────────────┐   │
//! │  │  Oracle   │───►│ DepthSensor │───►│ FusionUpdateBatch│   │
//! │  │ (SDF GT)  │    │ (ray fan +  │    └────────┬─────────┘   │
//! │  └─────┬─────┘    │   noise)    │             │             │
//! │        │          └─────────────┘             ▼             │
//! │        │ ground truth              ┌──────────────────┐     │
//! │        └──────────────────────────►│  SceneDatabase   │     │
//! │                                    │  + Integrator    │     │
//! │                                    └────────┬─────────┘     │
//! │                                             ▼               │
//! │                              EvaluationReport / SimExport   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use senfuse_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_frames(8).run(ScenarioId::DualSensor);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
mod sensor;
pub mod scenarios;

pub use error::{SimError, SimResult};
pub use exporter::{FrameRecord, SimExport};
pub use oracle::{CameraPose, GridSpec, Oracle, SceneShape};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use sensor::{DepthSensor, SensorModel};
