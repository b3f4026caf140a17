//! Reconstruction metrics against ground truth.
//!
//! A voxel counts as occupied when its signed distance is negative. Metrics
//! are computed over the voxels selected by a [`VoxelMask`]:
//!
//! - **iou**: occupied-in-both / occupied-in-either
//! - **acc**: fraction of voxels whose occupancy agrees
//! - **mad**: mean absolute distance error
//! - **mse**: mean squared distance error
//!
//! An empty mask yields `0.0` for all four metrics. A non-empty mask with
//! no occupied voxel on either side yields `iou = 0.0`.

use crate::error::{FusionError, Result};
use crate::grid::VoxelGrid;
use crate::mask::VoxelMask;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Metrics of one grid against ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub iou: f64,
    pub acc: f64,
    pub mad: f64,
    pub mse: f64,
}

impl EvalMetrics {
    /// Metric name to value, keyed `iou`, `acc`, `mad`, `mse`.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("iou", self.iou),
            ("acc", self.acc),
            ("mad", self.mad),
            ("mse", self.mse),
        ])
    }

    /// Divides every metric by `n`.
    pub fn scaled(&self, n: f64) -> Self {
        Self {
            iou: self.iou / n,
            acc: self.acc / n,
            mad: self.mad / n,
            mse: self.mse / n,
        }
    }
}

impl AddAssign for EvalMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.iou += rhs.iou;
        self.acc += rhs.acc;
        self.mad += rhs.mad;
        self.mse += rhs.mse;
    }
}

/// Compares `est` with `gt` over the voxels set in `mask`.
pub fn evaluate_grid(est: &VoxelGrid, gt: &VoxelGrid, mask: &VoxelMask) -> Result<EvalMetrics> {
    for shape in [gt.shape(), mask.shape()] {
        if shape != est.shape() {
            return Err(FusionError::ShapeMismatch {
                expected: est.shape().to_vec(),
                got: shape.to_vec(),
            });
        }
    }

    let est = est.scalar_values();
    let gt = gt.scalar_values();

    let mut n = 0usize;
    let mut abs_sum = 0.0f64;
    let mut sq_sum = 0.0f64;
    let mut agree = 0usize;
    let mut intersection = 0usize;
    let mut union = 0usize;

    for ((&e, &g), _) in est
        .iter()
        .zip(&gt)
        .zip(mask.bits())
        .filter(|(_, selected)| **selected)
    {
        let err = (e - g) as f64;
        n += 1;
        abs_sum += err.abs();
        sq_sum += err * err;

        let occ_est = e < 0.0;
        let occ_gt = g < 0.0;
        if occ_est == occ_gt {
            agree += 1;
        }
        if occ_est && occ_gt {
            intersection += 1;
        }
        if occ_est || occ_gt {
            union += 1;
        }
    }

    if n == 0 {
        return Ok(EvalMetrics::default());
    }

    let n = n as f64;
    Ok(EvalMetrics {
        iou: if union > 0 {
            intersection as f64 / union as f64
        } else {
            0.0
        },
        acc: agree as f64 / n,
        mad: abs_sum / n,
        mse: sq_sum / n,
    })
}

/// Evaluation context; per-scene results are only kept in `Test` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    Train,
    Val,
    Test,
}

impl std::str::FromStr for EvalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" => Ok(EvalMode::Train),
            "val" | "validation" => Ok(EvalMode::Val),
            "test" => Ok(EvalMode::Test),
            _ => Err(format!("Unknown evaluation mode: {}", s)),
        }
    }
}

/// Metrics of one scene, per sensor and for the fused grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneEvaluation {
    pub sensors: BTreeMap<String, EvalMetrics>,
    pub fused: EvalMetrics,
}

/// Scene-averaged metrics, plus per-scene detail in test mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub sensors: BTreeMap<String, EvalMetrics>,
    pub fused: EvalMetrics,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_scene: Option<BTreeMap<String, SceneEvaluation>>,
}
