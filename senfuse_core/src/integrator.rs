//! The fusion engine: running weighted-average merge of one update batch.
//!
//! For every deduplicated surface voxel with stored value `v0`, stored
//! weight `w0`, weighted value-sum `Δv` and weight-sum `Δw`:
//!
//! ```text
//! v = (w0*v0 + Δv) / (w0 + Δw)
//! w = clamp(w0 + Δw, 0, max_weight)
//! ```
//!
//! Empty-space voxels use the same rule with `Δv = 0.1 * Δw_empty`, pulling
//! the stored distance toward a small free-space value. Feature channels are
//! a plain mean over contributing samples: each sample counts once, whatever
//! its surface weight.
//!
//! Both passes read the grid state as it was before the call. Writes land in
//! the order surface, features, empty space, so an index present in both the
//! surface and the empty set ends with the empty-space result.

use crate::batch::FusionUpdateBatch;
use crate::config::{ExtractionStrategy, FusionConfig};
use crate::error::{FusionError, Result};
use crate::grid::{VoxelGrid, VoxelIndex};
use crate::reducer::{coalesce, unique_indices, Coalesced};
use half::f16;
use tracing::{debug, warn};

/// Target value of the empty-space (free-space carving) update.
pub const EMPTY_SPACE_VALUE: f64 = 0.1;

/// Share of the empty-space set exposed when training on border voxels.
const EMPTY_EXPOSURE_DIVISOR: usize = 10;

/// The four grids of one (scene, sensor) that an integration call mutates.
///
/// Borrowed for the duration of one call only.
#[derive(Debug)]
pub struct FusionTarget<'a> {
    pub tsdf: &'a mut VoxelGrid,
    pub weights: &'a mut VoxelGrid,
    pub features: &'a mut VoxelGrid,
    pub feature_weights: &'a mut VoxelGrid,
}

/// What one integration call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationOutcome {
    /// Voxels exposed to downstream consumers
    pub active_indices: Vec<VoxelIndex>,

    /// Unique voxels written by the surface pass
    pub surface_updates: usize,

    /// Unique voxels written by the empty-space pass
    pub empty_updates: usize,

    /// Unique voxels written by the feature pass
    pub feature_updates: usize,

    /// Entries dropped for lying outside the grid
    pub dropped: usize,
}

/// Merges fusion update batches into grid state.
#[derive(Debug, Clone)]
pub struct Integrator {
    max_weight: f32,
    extraction_strategy: ExtractionStrategy,
    train_on_border_voxels: bool,
    n_features: usize,
}

impl Integrator {
    /// Builds an integrator from a validated configuration.
    ///
    /// The weight ceiling is rounded down to the nearest half-precision value
    /// so a clamped weight is stored exactly.
    pub fn new(config: &FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_weight: storable_ceiling(config.max_weight),
            extraction_strategy: config.extraction_strategy,
            train_on_border_voxels: config.train_on_border_voxels,
            n_features: config.n_features,
        })
    }

    /// Effective weight ceiling.
    pub fn max_weight(&self) -> f32 {
        self.max_weight
    }

    /// Integrates one batch into `target` and returns the active index set.
    ///
    /// Contract violations (inconsistent batch arrays, grids of different
    /// shapes, wrong feature width) fail before any grid is touched.
    pub fn integrate(
        &self,
        batch: &FusionUpdateBatch,
        target: FusionTarget<'_>,
    ) -> Result<IntegrationOutcome> {
        batch.validate(self.extraction_strategy, self.n_features)?;
        let shape = self.check_target(&target)?;
        let f = self.n_features;
        let replication = self.extraction_strategy.replication();

        // Surface: [weight * value, weight] per entry.
        let mut contributions = Vec::with_capacity(batch.update_indices.len() * 2);
        for (pos, &weight) in batch.update_weights.iter().enumerate() {
            let value = batch.update_values[pos / replication] as f64;
            contributions.push(weight as f64 * value);
            contributions.push(weight as f64);
        }
        let surface = coalesce(&batch.update_indices, &contributions, 2, shape);

        let empty_weights: Vec<f64> = batch.update_weights_empty.iter().map(|&w| w as f64).collect();
        let empty = coalesce(&batch.update_indices_empty, &empty_weights, 1, shape);

        // Features: [f_0 .. f_{F-1}, 1] per sample point.
        let mut feature_contributions = Vec::with_capacity(batch.num_samples() * (f + 1));
        for features in batch.update_features.chunks(f) {
            feature_contributions.extend(features.iter().map(|&x| x as f64));
            feature_contributions.push(1.0);
        }
        let features = coalesce(&batch.update_feature_indices, &feature_contributions, f + 1, shape);

        let border = unique_indices(&batch.filter_indices, shape);

        let FusionTarget {
            tsdf,
            weights,
            features: feature_grid,
            feature_weights,
        } = target;

        let surface_writes = self.merge_values(&surface, tsdf, weights, |row| row[0]);
        let empty_writes = self.merge_values(&empty, tsdf, weights, |row| EMPTY_SPACE_VALUE * row[0]);
        let feature_writes = self.merge_features(&features, feature_grid, feature_weights);

        for &(key, value, weight) in &surface_writes {
            tsdf.set_value(key, value);
            weights.set_value(key, weight);
        }
        for (key, values, weight) in &feature_writes {
            feature_grid.set_channels(*key, values);
            feature_weights.set_value(*key, *weight);
        }
        for &(key, value, weight) in &empty_writes {
            tsdf.set_value(key, value);
            weights.set_value(key, weight);
        }

        let active_indices = if self.train_on_border_voxels {
            let exposed = empty.len() / EMPTY_EXPOSURE_DIVISOR;
            let mut active = surface.indices.clone();
            active.extend_from_slice(&empty.indices[..exposed]);
            active
        } else {
            border.indices
        };

        let dropped = surface.dropped + empty.dropped + features.dropped;
        debug!(
            "Integrated {} samples: surface={} empty={} features={} dropped={} active={}",
            batch.num_samples(),
            surface_writes.len(),
            empty_writes.len(),
            feature_writes.len(),
            dropped,
            active_indices.len()
        );

        Ok(IntegrationOutcome {
            active_indices,
            surface_updates: surface_writes.len(),
            empty_updates: empty_writes.len(),
            feature_updates: feature_writes.len(),
            dropped,
        })
    }

    /// Running average of one scalar pass; `delta` maps a coalesced row to `Δv`.
    fn merge_values(
        &self,
        reduced: &Coalesced,
        values: &VoxelGrid,
        weights: &VoxelGrid,
        delta: impl Fn(&[f64]) -> f64,
    ) -> Vec<(usize, f32, f32)> {
        let mut writes = Vec::with_capacity(reduced.len());
        for (i, &key) in reduced.keys.iter().enumerate() {
            let row = reduced.row(i);
            let w0 = weights.value_at(key) as f64;
            let v0 = values.value_at(key) as f64;
            let dw = row[row.len() - 1];
            let total = w0 + dw;
            if total <= 0.0 {
                // Zero-weight trilinear corners on a never-observed voxel.
                warn!("Skipping voxel {:?} with zero combined weight", reduced.indices[i]);
                continue;
            }
            let value = (w0 * v0 + delta(row)) / total;
            writes.push((key, value as f32, self.clamp_weight(total)));
        }
        writes
    }

    fn merge_features(
        &self,
        reduced: &Coalesced,
        features: &VoxelGrid,
        feature_weights: &VoxelGrid,
    ) -> Vec<(usize, Vec<f32>, f32)> {
        let f = self.n_features;
        let mut writes = Vec::with_capacity(reduced.len());
        for (i, &key) in reduced.keys.iter().enumerate() {
            let row = reduced.row(i);
            let w0 = feature_weights.value_at(key) as f64;
            // Every sample counts once, so the total is always positive.
            let total = w0 + row[f];
            let old = features.channels_at(key);
            let merged: Vec<f32> = old
                .iter()
                .zip(&row[..f])
                .map(|(&f0, &sum)| ((w0 * f0 as f64 + sum) / total) as f32)
                .collect();
            writes.push((key, merged, self.clamp_weight(total)));
        }
        writes
    }

    fn clamp_weight(&self, weight: f64) -> f32 {
        (weight as f32).clamp(0.0, self.max_weight)
    }

    fn check_target(&self, target: &FusionTarget<'_>) -> Result<[usize; 3]> {
        let shape = target.tsdf.shape();
        for grid in [&*target.weights, &*target.features, &*target.feature_weights] {
            if grid.shape() != shape {
                return Err(FusionError::ShapeMismatch {
                    expected: shape.to_vec(),
                    got: grid.shape().to_vec(),
                });
            }
        }
        if target.features.channels() != self.n_features {
            return Err(FusionError::FeatureWidth {
                expected: self.n_features,
                got: target.features.channels(),
            });
        }
        Ok(shape)
    }
}

/// Largest half-precision value not above `max_weight`.
fn storable_ceiling(max_weight: f32) -> f32 {
    let rounded = f16::from_f32(max_weight);
    if rounded.to_f32() > max_weight {
        f16::from_bits(rounded.to_bits() - 1).to_f32()
    } else {
        rounded.to_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchBuilder;
    use approx::assert_relative_eq;
    use half::f16;
    use nalgebra::Vector3;

    const SHAPE: [usize; 3] = [6, 6, 6];

    struct Grids {
        tsdf: VoxelGrid,
        weights: VoxelGrid,
        features: VoxelGrid,
        feature_weights: VoxelGrid,
    }

    impl Grids {
        fn new(n_features: usize) -> Self {
            Self {
                tsdf: VoxelGrid::filled(SHAPE, 0.1),
                weights: VoxelGrid::filled(SHAPE, 0.0),
                features: VoxelGrid::filled_channels(SHAPE, n_features, 0.0),
                feature_weights: VoxelGrid::filled(SHAPE, 0.0),
            }
        }

        fn target(&mut self) -> FusionTarget<'_> {
            FusionTarget {
                tsdf: &mut self.tsdf,
                weights: &mut self.weights,
                features: &mut self.features,
                feature_weights: &mut self.feature_weights,
            }
        }
    }

    fn nn_config(n_features: usize) -> FusionConfig {
        FusionConfig {
            extraction_strategy: ExtractionStrategy::NearestNeighbor,
            n_features,
            max_weight: 100.0,
            ..Default::default()
        }
    }

    /// Nearest-neighbor batch with one sample per (index, value, weight).
    fn nn_batch(samples: &[([i64; 3], f32, f32)]) -> FusionUpdateBatch {
        FusionUpdateBatch {
            update_values: samples.iter().map(|s| s.1).collect(),
            update_features: samples.iter().map(|s| s.1).collect(),
            update_indices: samples.iter().map(|s| s.0).collect(),
            update_feature_indices: samples.iter().map(|s| s.0).collect(),
            filter_indices: samples.iter().map(|s| s.0).collect(),
            update_weights: samples.iter().map(|s| s.2).collect(),
            ..Default::default()
        }
    }

    fn half(x: f32) -> f32 {
        f16::from_f32(x).to_f32()
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        let before = (grids.tsdf.clone(), grids.weights.clone(), grids.features.clone());

        let outcome = integrator
            .integrate(&FusionUpdateBatch::default(), grids.target())
            .unwrap();

        assert!(outcome.active_indices.is_empty());
        assert_eq!(outcome.surface_updates, 0);
        assert_eq!(grids.tsdf, before.0);
        assert_eq!(grids.weights, before.1);
        assert_eq!(grids.features, before.2);
    }

    #[test]
    fn test_weighted_average() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        grids.tsdf.write([2, 2, 2], -0.04).unwrap();
        grids.weights.write([2, 2, 2], 3.0).unwrap();

        integrator
            .integrate(&nn_batch(&[([2, 2, 2], 0.06, 2.0)]), grids.target())
            .unwrap();

        let v0 = half(-0.04) as f64;
        let expected = (3.0 * v0 + 2.0 * 0.06f32 as f64) / 5.0;
        assert_relative_eq!(grids.tsdf.read([2, 2, 2]).unwrap() as f64, expected, epsilon = 1e-3);
        assert_eq!(grids.weights.read([2, 2, 2]), Some(5.0));
    }

    #[test]
    fn test_collisions_match_presummed_sample() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();

        let mut split = Grids::new(1);
        integrator
            .integrate(
                &nn_batch(&[([1, 2, 3], 0.08, 1.0), ([1, 2, 3], -0.02, 3.0)]),
                split.target(),
            )
            .unwrap();

        let mut swapped = Grids::new(1);
        integrator
            .integrate(
                &nn_batch(&[([1, 2, 3], -0.02, 3.0), ([1, 2, 3], 0.08, 1.0)]),
                swapped.target(),
            )
            .unwrap();

        // One sample of weight 4 carrying the same value-sum.
        let mut merged = Grids::new(1);
        let presummed_value = (1.0 * 0.08 + 3.0 * -0.02) / 4.0;
        integrator
            .integrate(&nn_batch(&[([1, 2, 3], presummed_value, 4.0)]), merged.target())
            .unwrap();

        assert_eq!(split.tsdf, swapped.tsdf);
        assert_relative_eq!(
            split.tsdf.read([1, 2, 3]).unwrap(),
            merged.tsdf.read([1, 2, 3]).unwrap(),
            epsilon = 1e-3
        );
        assert_eq!(split.weights.read([1, 2, 3]), Some(4.0));
    }

    #[test]
    fn test_out_of_bounds_never_written() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        let before = grids.tsdf.clone();

        let outcome = integrator
            .integrate(
                &nn_batch(&[
                    ([-1, 0, 0], -0.05, 1.0),
                    ([6, 0, 0], -0.05, 1.0),
                    ([0, 7, 0], -0.05, 1.0),
                    ([0, 0, 100], -0.05, 1.0),
                ]),
                grids.target(),
            )
            .unwrap();

        assert_eq!(outcome.dropped, 8);
        assert_eq!(grids.tsdf, before);
        assert!(grids.weights.to_f32_vec().iter().all(|&w| w == 0.0));
        assert!(outcome.active_indices.is_empty());
    }

    #[test]
    fn test_weight_saturates_at_ceiling() {
        let config = FusionConfig {
            max_weight: 10.0,
            ..nn_config(1)
        };
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        let mut history = Vec::new();
        for _ in 0..6 {
            integrator
                .integrate(&nn_batch(&[([0, 0, 0], 0.0, 3.0)]), grids.target())
                .unwrap();
            history.push(grids.weights.read([0, 0, 0]).unwrap());
        }

        assert_eq!(history, vec![3.0, 6.0, 9.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_ceiling_rounds_down_to_storable_weight() {
        let config = FusionConfig {
            max_weight: 1000.3,
            ..nn_config(1)
        };
        let integrator = Integrator::new(&config).unwrap();
        assert_eq!(integrator.max_weight(), 1000.0);
        let mut grids = Grids::new(1);

        let mut history = Vec::new();
        for _ in 0..4 {
            integrator
                .integrate(&nn_batch(&[([1, 1, 1], -0.05, 400.0)]), grids.target())
                .unwrap();
            history.push(grids.weights.read([1, 1, 1]).unwrap());
        }

        assert_eq!(history, vec![400.0, 800.0, 1000.0, 1000.0]);
        assert!(history.iter().all(|&w| w <= config.max_weight));
    }

    #[test]
    fn test_heavy_weights_stay_finite_at_largest_ceiling() {
        let config = FusionConfig {
            max_weight: 65504.0,
            ..nn_config(1)
        };
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        for _ in 0..3 {
            integrator
                .integrate(&nn_batch(&[([2, 2, 2], -0.05, 40000.0)]), grids.target())
                .unwrap();
            let weight = grids.weights.read([2, 2, 2]).unwrap();
            let value = grids.tsdf.read([2, 2, 2]).unwrap();
            assert!(weight.is_finite() && weight <= 65504.0);
            assert_relative_eq!(value, -0.05, epsilon = 1e-3);
        }
        assert_eq!(grids.weights.read([2, 2, 2]), Some(65504.0));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let zero_width = FusionConfig {
            n_features: 0,
            ..nn_config(1)
        };
        assert!(matches!(Integrator::new(&zero_width), Err(FusionError::InvalidConfig(_))));

        let unstorable = FusionConfig {
            max_weight: 1e5,
            ..nn_config(1)
        };
        assert!(Integrator::new(&unstorable).is_err());
    }

    #[test]
    fn test_values_beyond_truncation_are_stored_unclamped() {
        let config = nn_config(1);
        assert!(0.5 > config.trunc_value);
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        let batch = nn_batch(&[([1, 2, 3], 0.5, 1.0)]);
        integrator.integrate(&batch, grids.target()).unwrap();

        assert_eq!(grids.tsdf.read([1, 2, 3]), Some(half(0.5)));
    }

    #[test]
    fn test_empty_space_carving_on_fresh_voxel() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        grids.tsdf.write([3, 3, 3], -0.07).unwrap();

        let batch = FusionUpdateBatch {
            update_indices_empty: vec![[3, 3, 3]],
            update_weights_empty: vec![2.5],
            ..Default::default()
        };
        let outcome = integrator.integrate(&batch, grids.target()).unwrap();

        assert_eq!(outcome.empty_updates, 1);
        assert_eq!(grids.tsdf.read([3, 3, 3]), Some(half(0.1)));
        assert_eq!(grids.weights.read([3, 3, 3]), Some(2.5));
    }

    #[test]
    fn test_empty_space_pulls_negative_voxel_toward_positive() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        grids.tsdf.write([1, 1, 1], -0.1).unwrap();
        grids.weights.write([1, 1, 1], 1.0).unwrap();

        let batch = FusionUpdateBatch {
            update_indices_empty: vec![[1, 1, 1]],
            update_weights_empty: vec![1.0],
            ..Default::default()
        };
        integrator.integrate(&batch, grids.target()).unwrap();

        let expected = (half(-0.1) as f64 + 0.1) / 2.0;
        assert_relative_eq!(grids.tsdf.read([1, 1, 1]).unwrap() as f64, expected, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_space_wins_on_overlap() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);

        let mut batch = nn_batch(&[([2, 2, 2], -0.05, 1.0)]);
        batch.update_indices_empty = vec![[2, 2, 2]];
        batch.update_weights_empty = vec![1.0];
        integrator.integrate(&batch, grids.target()).unwrap();

        // Empty pass reads the pre-call state (w0 = 0) and is written last.
        assert_eq!(grids.tsdf.read([2, 2, 2]), Some(half(0.1)));
        assert_eq!(grids.weights.read([2, 2, 2]), Some(1.0));
    }

    #[test]
    fn test_active_indices_are_filter_set() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);

        let mut batch = nn_batch(&[
            ([0, 0, 0], 0.01, 1.0),
            ([2, 2, 2], 0.01, 1.0),
            ([3, 2, 2], 0.01, 1.0),
        ]);
        batch.filter_indices = vec![[3, 2, 2], [2, 2, 2], [3, 2, 2], [9, 9, 9]];
        batch.update_indices_empty = (0..6).map(|i| [i, 5, 5]).collect();
        batch.update_weights_empty = vec![1.0; 6];

        let outcome = integrator.integrate(&batch, grids.target()).unwrap();
        assert_eq!(outcome.active_indices, vec![[2, 2, 2], [3, 2, 2]]);
    }

    #[test]
    fn test_active_indices_when_training_on_border() {
        let config = FusionConfig {
            train_on_border_voxels: true,
            ..nn_config(1)
        };
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        let mut batch = nn_batch(&[([0, 0, 0], 0.01, 1.0), ([0, 0, 0], 0.02, 1.0)]);
        batch.update_indices_empty = (0..5).flat_map(|i| [[i, 1, 1], [i, 2, 1]]).collect();
        batch.update_weights_empty = vec![1.0; 10];

        let outcome = integrator.integrate(&batch, grids.target()).unwrap();
        // One unique surface voxel plus the first tenth of ten unique empty voxels.
        assert_eq!(outcome.active_indices, vec![[0, 0, 0], [0, 1, 1]]);
    }

    #[test]
    fn test_features_average_by_sample_count() {
        let integrator = Integrator::new(&nn_config(2)).unwrap();
        let mut grids = Grids::new(2);

        let batch = FusionUpdateBatch {
            update_values: vec![0.0, 0.0],
            update_features: vec![1.0, 4.0, 3.0, 8.0],
            update_indices: vec![[1, 1, 1], [1, 1, 1]],
            update_feature_indices: vec![[1, 1, 1], [1, 1, 1]],
            update_weights: vec![10.0, 0.5],
            ..Default::default()
        };
        let outcome = integrator.integrate(&batch, grids.target()).unwrap();

        assert_eq!(outcome.feature_updates, 1);
        assert_eq!(grids.features.read_channels([1, 1, 1]), Some(vec![2.0, 6.0]));
        assert_eq!(grids.feature_weights.read([1, 1, 1]), Some(2.0));
    }

    #[test]
    fn test_trilinear_spreads_value_over_corners() {
        let config = FusionConfig {
            extraction_strategy: ExtractionStrategy::TrilinearInterpolation,
            n_features: 1,
            ..Default::default()
        };
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        let mut builder = BatchBuilder::new(config.extraction_strategy, 1, SHAPE, 0);
        builder
            .push_sample(&Vector3::new(2.5, 2.5, 2.5), -0.03, 8.0, &[1.0])
            .unwrap();
        let outcome = integrator.integrate(&builder.finish(), grids.target()).unwrap();

        assert_eq!(outcome.surface_updates, 8);
        for corner in [[2, 2, 2], [3, 3, 3], [2, 3, 2]] {
            assert_relative_eq!(grids.tsdf.read(corner).unwrap(), -0.03, epsilon = 1e-3);
            assert_eq!(grids.weights.read(corner), Some(1.0));
        }
    }

    #[test]
    fn test_zero_weight_corner_leaves_voxel_untouched() {
        let config = FusionConfig {
            extraction_strategy: ExtractionStrategy::TrilinearInterpolation,
            n_features: 1,
            ..Default::default()
        };
        let integrator = Integrator::new(&config).unwrap();
        let mut grids = Grids::new(1);

        let mut builder = BatchBuilder::new(config.extraction_strategy, 1, SHAPE, 0);
        builder
            .push_sample(&Vector3::new(2.0, 2.0, 2.0), -0.03, 1.0, &[1.0])
            .unwrap();
        let outcome = integrator.integrate(&builder.finish(), grids.target()).unwrap();

        assert_eq!(outcome.surface_updates, 1);
        assert_eq!(grids.tsdf.read([3, 3, 3]), Some(half(0.1)));
        assert!(!grids.tsdf.read([3, 3, 3]).unwrap().is_nan());
    }

    #[test]
    fn test_contract_violation_leaves_grids_untouched() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        let before = grids.tsdf.clone();

        let mut batch = nn_batch(&[([1, 1, 1], -0.05, 1.0)]);
        batch.update_weights.push(1.0);
        assert!(integrator.integrate(&batch, grids.target()).is_err());
        assert_eq!(grids.tsdf, before);
    }

    #[test]
    fn test_rejects_mismatched_grid_shapes() {
        let integrator = Integrator::new(&nn_config(1)).unwrap();
        let mut grids = Grids::new(1);
        grids.weights = VoxelGrid::filled([6, 6, 5], 0.0);
        let result = integrator.integrate(&FusionUpdateBatch::default(), grids.target());
        assert!(matches!(result, Err(FusionError::ShapeMismatch { .. })));
    }
}
