//! Fusion update batches: the per-frame, per-sensor input of the integrator.
//!
//! A producer (depth projection, not part of this crate) reduces one depth
//! frame to sample points in continuous voxel coordinates. [`BatchBuilder`]
//! turns those into the flat index/value/weight arrays the integrator
//! consumes, replicating each sample across one or eight voxels depending on
//! the [`ExtractionStrategy`].

use crate::config::ExtractionStrategy;
use crate::error::{FusionError, Result};
use crate::grid::VoxelIndex;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Sparse updates for one sensor and one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionUpdateBatch {
    /// Distance value per sample point
    pub update_values: Vec<f32>,

    /// Feature vector per sample point, flattened (`F` floats each)
    pub update_features: Vec<f32>,

    /// Voxel indices, `replication` per sample point
    pub update_indices: Vec<VoxelIndex>,

    /// Voxel index for feature accumulation, one per sample point
    pub update_feature_indices: Vec<VoxelIndex>,

    /// Subset of `update_indices` away from the grid border
    pub filter_indices: Vec<VoxelIndex>,

    /// Weight per entry of `update_indices`
    pub update_weights: Vec<f32>,

    /// Voxels traversed by a ray in front of the observed surface
    pub update_indices_empty: Vec<VoxelIndex>,

    /// Weight per entry of `update_indices_empty`
    pub update_weights_empty: Vec<f32>,
}

impl FusionUpdateBatch {
    /// Number of sample points.
    pub fn num_samples(&self) -> usize {
        self.update_values.len()
    }

    /// True when the batch carries neither surface nor empty-space updates.
    pub fn is_empty(&self) -> bool {
        self.update_values.is_empty() && self.update_indices_empty.is_empty()
    }

    /// Checks that all parallel arrays agree in length.
    ///
    /// A mismatch is a producer bug and is never coerced.
    pub fn validate(&self, strategy: ExtractionStrategy, n_features: usize) -> Result<()> {
        let points = self.update_values.len();
        let replicated = points * strategy.replication();

        if self.update_indices.len() != replicated {
            return Err(FusionError::length("update_indices", replicated, self.update_indices.len()));
        }
        if self.update_weights.len() != self.update_indices.len() {
            return Err(FusionError::length(
                "update_weights",
                self.update_indices.len(),
                self.update_weights.len(),
            ));
        }
        if self.update_feature_indices.len() != points {
            return Err(FusionError::length(
                "update_feature_indices",
                points,
                self.update_feature_indices.len(),
            ));
        }
        if self.update_features.len() != points * n_features {
            if points > 0 && self.update_features.len() % points == 0 {
                return Err(FusionError::FeatureWidth {
                    expected: n_features,
                    got: self.update_features.len() / points,
                });
            }
            return Err(FusionError::length(
                "update_features",
                points * n_features,
                self.update_features.len(),
            ));
        }
        if self.update_weights_empty.len() != self.update_indices_empty.len() {
            return Err(FusionError::length(
                "update_weights_empty",
                self.update_indices_empty.len(),
                self.update_weights_empty.len(),
            ));
        }
        Ok(())
    }
}

/// Nearest lattice voxel of a continuous voxel coordinate.
pub fn nearest_voxel(coord: &Vector3<f64>) -> VoxelIndex {
    [
        coord.x.round() as i64,
        coord.y.round() as i64,
        coord.z.round() as i64,
    ]
}

/// The eight lattice corners around `coord` with their trilinear weights.
///
/// Weights are non-negative and sum to one.
pub fn trilinear_corners(coord: &Vector3<f64>) -> [(VoxelIndex, f32); 8] {
    let base = coord.map(f64::floor);
    let frac = coord - base;
    let b = [base.x as i64, base.y as i64, base.z as i64];

    let mut corners = [([0i64; 3], 0.0f32); 8];
    for (n, corner) in corners.iter_mut().enumerate() {
        let dx = (n >> 2) & 1;
        let dy = (n >> 1) & 1;
        let dz = n & 1;
        let wx = if dx == 1 { frac.x } else { 1.0 - frac.x };
        let wy = if dy == 1 { frac.y } else { 1.0 - frac.y };
        let wz = if dz == 1 { frac.z } else { 1.0 - frac.z };
        *corner = (
            [b[0] + dx as i64, b[1] + dy as i64, b[2] + dz as i64],
            (wx * wy * wz) as f32,
        );
    }
    corners
}

/// Incrementally assembles a [`FusionUpdateBatch`].
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    strategy: ExtractionStrategy,
    n_features: usize,
    shape: [usize; 3],
    border_margin: usize,
    batch: FusionUpdateBatch,
}

impl BatchBuilder {
    /// Creates a builder for grids of `shape`.
    ///
    /// Indices closer than `border_margin` voxels to any face are left out of
    /// `filter_indices`.
    pub fn new(
        strategy: ExtractionStrategy,
        n_features: usize,
        shape: [usize; 3],
        border_margin: usize,
    ) -> Self {
        Self {
            strategy,
            n_features,
            shape,
            border_margin,
            batch: FusionUpdateBatch::default(),
        }
    }

    /// Adds one surface sample at continuous voxel coordinate `coord`.
    pub fn push_sample(
        &mut self,
        coord: &Vector3<f64>,
        value: f32,
        weight: f32,
        features: &[f32],
    ) -> Result<()> {
        if features.len() != self.n_features {
            return Err(FusionError::FeatureWidth {
                expected: self.n_features,
                got: features.len(),
            });
        }

        self.batch.update_values.push(value);
        self.batch.update_features.extend_from_slice(features);
        self.batch.update_feature_indices.push(nearest_voxel(coord));

        for (index, share) in self.spread(coord, weight) {
            if self.is_interior(index) {
                self.batch.filter_indices.push(index);
            }
            self.batch.update_indices.push(index);
            self.batch.update_weights.push(share);
        }
        Ok(())
    }

    /// Adds one empty-space sample at continuous voxel coordinate `coord`.
    pub fn push_empty(&mut self, coord: &Vector3<f64>, weight: f32) {
        for (index, share) in self.spread(coord, weight) {
            self.batch.update_indices_empty.push(index);
            self.batch.update_weights_empty.push(share);
        }
    }

    /// Number of surface samples pushed so far.
    pub fn num_samples(&self) -> usize {
        self.batch.num_samples()
    }

    pub fn finish(self) -> FusionUpdateBatch {
        self.batch
    }

    fn spread(&self, coord: &Vector3<f64>, weight: f32) -> Vec<(VoxelIndex, f32)> {
        match self.strategy {
            ExtractionStrategy::NearestNeighbor => vec![(nearest_voxel(coord), weight)],
            ExtractionStrategy::TrilinearInterpolation => trilinear_corners(coord)
                .iter()
                .map(|&(index, w)| (index, w * weight))
                .collect(),
        }
    }

    fn is_interior(&self, index: VoxelIndex) -> bool {
        let margin = self.border_margin as i64;
        index
            .iter()
            .zip(self.shape.iter())
            .all(|(&i, &n)| i >= margin && i < n as i64 - margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trilinear_weights_sum_to_one() {
        let corners = trilinear_corners(&Vector3::new(1.25, 2.5, 3.75));
        let total: f32 = corners.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
        assert_eq!(corners[0].0, [1, 2, 3]);
        assert_eq!(corners[7].0, [2, 3, 4]);
    }

    #[test]
    fn test_trilinear_on_lattice_point() {
        let corners = trilinear_corners(&Vector3::new(2.0, 2.0, 2.0));
        assert_relative_eq!(corners[0].1, 1.0, epsilon = 1e-6);
        assert!(corners[1..].iter().all(|(_, w)| *w == 0.0));
    }

    #[test]
    fn test_builder_produces_valid_trilinear_batch() {
        let strategy = ExtractionStrategy::TrilinearInterpolation;
        let mut builder = BatchBuilder::new(strategy, 2, [8, 8, 8], 1);
        builder
            .push_sample(&Vector3::new(3.3, 3.3, 3.3), 0.05, 2.0, &[1.0, 0.5])
            .unwrap();
        builder.push_empty(&Vector3::new(2.1, 2.1, 2.1), 1.0);
        let batch = builder.finish();

        assert!(batch.validate(strategy, 2).is_ok());
        assert_eq!(batch.update_indices.len(), 8);
        assert_eq!(batch.update_indices_empty.len(), 8);
        let total: f32 = batch.update_weights.iter().sum();
        assert_relative_eq!(total, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_builder_filters_border_voxels() {
        let strategy = ExtractionStrategy::NearestNeighbor;
        let mut builder = BatchBuilder::new(strategy, 1, [8, 8, 8], 2);
        builder.push_sample(&Vector3::new(1.0, 4.0, 4.0), 0.0, 1.0, &[0.0]).unwrap();
        builder.push_sample(&Vector3::new(4.0, 4.0, 4.0), 0.0, 1.0, &[0.0]).unwrap();
        let batch = builder.finish();
        assert_eq!(batch.filter_indices, vec![[4, 4, 4]]);
    }

    #[test]
    fn test_builder_rejects_wrong_feature_width() {
        let mut builder = BatchBuilder::new(ExtractionStrategy::NearestNeighbor, 3, [4, 4, 4], 0);
        let result = builder.push_sample(&Vector3::zeros(), 0.0, 1.0, &[1.0]);
        assert!(matches!(result, Err(FusionError::FeatureWidth { expected: 3, got: 1 })));
    }

    #[test]
    fn test_validate_detects_length_mismatch() {
        let batch = FusionUpdateBatch {
            update_values: vec![0.1],
            update_features: vec![0.0],
            update_indices: vec![[0, 0, 0]],
            update_feature_indices: vec![[0, 0, 0]],
            update_weights: vec![],
            ..Default::default()
        };
        let err = batch.validate(ExtractionStrategy::NearestNeighbor, 1).unwrap_err();
        assert!(matches!(err, FusionError::LengthMismatch { field: "update_weights", .. }));
    }

    #[test]
    fn test_validate_detects_replication_mismatch() {
        let batch = FusionUpdateBatch {
            update_values: vec![0.1],
            update_features: vec![0.0],
            update_indices: vec![[0, 0, 0]],
            update_feature_indices: vec![[0, 0, 0]],
            update_weights: vec![1.0],
            ..Default::default()
        };
        assert!(batch.validate(ExtractionStrategy::TrilinearInterpolation, 1).is_err());
        assert!(batch.validate(ExtractionStrategy::NearestNeighbor, 1).is_ok());
    }

    #[test]
    fn test_validate_reports_feature_width() {
        let batch = FusionUpdateBatch {
            update_values: vec![0.1, 0.2],
            update_features: vec![0.0; 6],
            update_indices: vec![[0, 0, 0]; 2],
            update_feature_indices: vec![[0, 0, 0]; 2],
            update_weights: vec![1.0; 2],
            ..Default::default()
        };
        let err = batch.validate(ExtractionStrategy::NearestNeighbor, 2).unwrap_err();
        assert!(matches!(err, FusionError::FeatureWidth { expected: 2, got: 3 }));
    }
}
