//! Oracle sensor weighting for two-sensor fusion.
//!
//! Given two per-sensor TSDF grids and ground truth, the proxy weighting is
//! the per-voxel blend coefficient `alpha` for which
//! `alpha * t0 + (1 - alpha) * t1` best explains the ground truth:
//!
//! - ground truth strictly between the two estimates: the exact interpolant
//!   `|gt - t1| / (|gt - t0| + |gt - t1|)`
//! - both estimates on the same side: `1` if sensor 0 is closer, else `0`
//! - only one sensor observed the voxel: trust it unless its error exceeds
//!   [`SINGLE_SENSOR_ERROR_THRESHOLD`]
//!
//! Voxels neither sensor observed stay at `-1`.

use crate::error::{FusionError, Result};
use crate::grid::VoxelGrid;

/// Error above which a lone sensor observation is rejected.
pub const SINGLE_SENSOR_ERROR_THRESHOLD: f32 = 0.04;

/// Marker for voxels without a blend coefficient.
pub const UNTOUCHED_WEIGHTING: f32 = -1.0;

/// One sensor's TSDF and the weights deciding which voxels it observed.
#[derive(Debug, Clone, Copy)]
pub struct SensorObservation<'a> {
    pub tsdf: &'a VoxelGrid,
    pub weights: &'a VoxelGrid,
}

/// Computes the proxy weighting grid for a sensor pair.
pub fn proxy_sensor_weighting(
    first: SensorObservation<'_>,
    second: SensorObservation<'_>,
    gt: &VoxelGrid,
) -> Result<VoxelGrid> {
    let shape = gt.shape();
    for grid in [first.tsdf, first.weights, second.tsdf, second.weights] {
        check_shape(shape, grid)?;
    }

    let t0 = first.tsdf.scalar_values();
    let t1 = second.tsdf.scalar_values();
    let w0 = first.weights.scalar_values();
    let w1 = second.weights.scalar_values();
    let g = gt.scalar_values();

    let alpha: Vec<f32> = (0..g.len())
        .map(|i| {
            let seen0 = w0[i] > 0.0;
            let seen1 = w1[i] > 0.0;
            let err0 = (g[i] - t0[i]).abs();
            let err1 = (g[i] - t1[i]).abs();
            match (seen0, seen1) {
                (true, true) => {
                    let between = (t0[i] < g[i] && g[i] < t1[i]) || (t1[i] < g[i] && g[i] < t0[i]);
                    if between {
                        err1 / (err0 + err1)
                    } else if err0 < err1 {
                        1.0
                    } else {
                        0.0
                    }
                }
                (true, false) => indicator(err0 < SINGLE_SENSOR_ERROR_THRESHOLD),
                (false, true) => indicator(err1 > SINGLE_SENSOR_ERROR_THRESHOLD),
                (false, false) => UNTOUCHED_WEIGHTING,
            }
        })
        .collect();

    let mut weighting = gt.like(1, UNTOUCHED_WEIGHTING);
    weighting.from_array(&alpha, shape, None)?;
    Ok(weighting)
}

/// Blends two TSDF grids with a weighting grid (channel 0).
///
/// Voxels whose weighting is negative fall back to the weight-averaged
/// estimate of both sensors, or `untouched_value` where neither has weight.
pub fn blend_pair(
    weighting: &VoxelGrid,
    first: SensorObservation<'_>,
    second: SensorObservation<'_>,
    untouched_value: f32,
) -> Result<VoxelGrid> {
    let shape = weighting.shape();
    for grid in [first.tsdf, first.weights, second.tsdf, second.weights] {
        check_shape(shape, grid)?;
    }

    let alpha = weighting.scalar_values();
    let t0 = first.tsdf.scalar_values();
    let t1 = second.tsdf.scalar_values();
    let w0 = first.weights.scalar_values();
    let w1 = second.weights.scalar_values();
    let fused: Vec<f32> = (0..alpha.len())
        .map(|i| {
            if alpha[i] >= 0.0 {
                alpha[i] * t0[i] + (1.0 - alpha[i]) * t1[i]
            } else if w0[i] + w1[i] > 0.0 {
                (w0[i] * t0[i] + w1[i] * t1[i]) / (w0[i] + w1[i])
            } else {
                untouched_value
            }
        })
        .collect();

    let mut out = first.tsdf.like(1, untouched_value);
    out.from_array(&fused, shape, None)?;
    Ok(out)
}

fn indicator(flag: bool) -> f32 {
    if flag {
        1.0
    } else {
        0.0
    }
}

fn check_shape(shape: [usize; 3], grid: &VoxelGrid) -> Result<()> {
    if grid.shape() != shape {
        return Err(FusionError::ShapeMismatch {
            expected: shape.to_vec(),
            got: grid.shape().to_vec(),
        });
    }
    Ok(())
}
