//! Simulated depth sensors.
//!
//! A [`DepthSensor`] casts a square fan of rays from a camera pose, corrupts
//! the ideal depth with bias, Gaussian noise and occasional short outliers,
//! and reduces each ray to a [`FusionUpdateBatch`]:
//! - surface samples in a band of `±trunc` around the measured depth, with
//!   the projective signed distance as value
//! - empty-space samples between the camera and the band

use crate::error::{SimError, SimResult};
use crate::oracle::{CameraPose, Oracle};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use senfuse_core::{BatchBuilder, FusionConfig, FusionUpdateBatch, VoxelGrid};
use serde::{Deserialize, Serialize};

/// Noise and sampling parameters of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorModel {
    pub name: String,

    /// Depth noise standard deviation (meters)
    pub noise_std: f64,

    /// Constant depth offset (meters)
    pub bias: f64,

    /// Probability that a ray reports a spuriously short depth
    pub outlier_rate: f64,

    /// Surface sample weight
    pub weight: f32,

    /// Empty-space sample weight
    pub empty_weight: f32,

    /// Rays per image axis
    pub rays_per_axis: usize,

    /// Full field of view (radians)
    pub fov: f64,

    /// Maximum measurable depth (meters)
    pub max_range: f64,
}

impl SensorModel {
    /// Accurate active depth sensor.
    pub fn tof() -> Self {
        Self {
            name: "tof".to_string(),
            noise_std: 0.004,
            bias: 0.0,
            outlier_rate: 0.0,
            weight: 1.0,
            empty_weight: 0.5,
            rays_per_axis: 24,
            fov: 60f64.to_radians(),
            max_range: 5.0,
        }
    }

    /// Noisier passive stereo with a slight far bias.
    pub fn stereo() -> Self {
        Self {
            name: "stereo".to_string(),
            noise_std: 0.015,
            bias: 0.01,
            outlier_rate: 0.02,
            ..Self::tof()
        }
    }

    /// Preset for `name`, falling back to a generic mid-noise sensor.
    pub fn for_name(name: &str) -> Self {
        match name {
            "tof" => Self::tof(),
            "stereo" => Self::stereo(),
            other => Self {
                name: other.to_string(),
                noise_std: 0.01,
                ..Self::tof()
            },
        }
    }

    pub fn with_outlier_rate(mut self, rate: f64) -> Self {
        self.outlier_rate = rate;
        self
    }

    pub fn with_rays_per_axis(mut self, rays: usize) -> Self {
        self.rays_per_axis = rays;
        self
    }
}

/// A sensor with its own deterministic noise stream.
pub struct DepthSensor {
    model: SensorModel,
    rng: ChaCha8Rng,
    noise: Normal<f64>,
}

impl DepthSensor {
    pub fn new(model: SensorModel, seed: u64) -> SimResult<Self> {
        if !(0.0..=1.0).contains(&model.outlier_rate) {
            return Err(SimError::sensor(&model.name, "outlier_rate must lie in [0, 1]"));
        }
        if model.rays_per_axis == 0 {
            return Err(SimError::sensor(&model.name, "rays_per_axis must be positive"));
        }
        if !(model.noise_std >= 0.0 && model.noise_std.is_finite()) {
            return Err(SimError::sensor(&model.name, "noise_std must be finite and non-negative"));
        }
        let noise = Normal::new(0.0, model.noise_std).map_err(|e| SimError::sensor(&model.name, e))?;
        Ok(Self {
            model,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
        })
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn model(&self) -> &SensorModel {
        &self.model
    }

    /// Measures the oracle scene from `pose` and builds one update batch.
    ///
    /// `lattice` supplies the grid placement; samples outside it are kept and
    /// left for the integrator to drop.
    pub fn observe(
        &mut self,
        oracle: &Oracle,
        pose: &CameraPose,
        lattice: &VoxelGrid,
        config: &FusionConfig,
        border_margin: usize,
    ) -> SimResult<FusionUpdateBatch> {
        let mut builder = BatchBuilder::new(
            config.extraction_strategy,
            config.n_features,
            lattice.shape(),
            border_margin,
        );
        let trunc = config.trunc_value as f64;
        let voxel = lattice.voxel_size;
        let band = (trunc / voxel).ceil() as i64;

        for direction in self.ray_fan(pose) {
            let Some(true_depth) = oracle.cast_ray(&pose.position, &direction, self.model.max_range) else {
                continue;
            };
            let depth = self.measure(true_depth);
            let hit = pose.position + direction * true_depth;
            let incidence = oracle.shape().normal(&hit).dot(&-direction).abs();

            for step in -band..=band {
                let offset = step as f64 * voxel;
                let point = pose.position + direction * (depth + offset);
                let value = (-offset).clamp(-trunc, trunc) as f32;
                let mut features = vec![
                    depth as f32,
                    self.model.noise_std as f32,
                    incidence as f32,
                    (offset / trunc) as f32,
                ];
                features.resize(config.n_features, 0.0);
                builder.push_sample(&lattice.world_to_voxel(&point), value, self.model.weight, &features)?;
            }

            // Free space up to one voxel before the band.
            let free_until = depth - trunc - voxel;
            let mut t = voxel;
            while t < free_until {
                let point = pose.position + direction * t;
                builder.push_empty(&lattice.world_to_voxel(&point), self.model.empty_weight);
                t += 2.0 * voxel;
            }
        }

        Ok(builder.finish())
    }

    fn measure(&mut self, true_depth: f64) -> f64 {
        let mut depth = true_depth + self.model.bias + self.noise.sample(&mut self.rng);
        if self.model.outlier_rate > 0.0 && self.rng.gen_bool(self.model.outlier_rate) {
            depth *= self.rng.gen_range(0.5..0.9);
        }
        depth.max(0.0)
    }

    fn ray_fan(&self, pose: &CameraPose) -> Vec<Vector3<f64>> {
        let forward = pose.forward();
        let right = forward
            .cross(&Vector3::z())
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::x);
        let up = right.cross(&forward);
        let n = self.model.rays_per_axis;
        let half = (self.model.fov * 0.5).tan();

        let mut rays = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let u = ((i as f64 + 0.5) / n as f64 * 2.0 - 1.0) * half;
                let v = ((j as f64 + 0.5) / n as f64 * 2.0 - 1.0) * half;
                rays.push((forward + right * u + up * v).normalize());
            }
        }
        rays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::GridSpec;
    use senfuse_core::ExtractionStrategy;

    fn setup() -> (Oracle, VoxelGrid, CameraPose) {
        let mut oracle = Oracle::sphere_scene(GridSpec::default(), 42);
        let lattice = oracle.ground_truth_grid(0.1).unwrap();
        let pose = oracle.camera_pose(0, 8);
        (oracle, lattice, pose)
    }

    #[test]
    fn test_batch_is_consistent() {
        let (oracle, lattice, pose) = setup();
        let config = FusionConfig::default();
        let mut sensor = DepthSensor::new(SensorModel::tof().with_rays_per_axis(8), 1).unwrap();
        let batch = sensor.observe(&oracle, &pose, &lattice, &config, 2).unwrap();

        assert!(batch.num_samples() > 0);
        assert!(!batch.update_indices_empty.is_empty());
        batch
            .validate(config.extraction_strategy, config.n_features)
            .unwrap();
        assert_eq!(batch.update_indices.len(), batch.num_samples() * 8);
    }

    #[test]
    fn test_nearest_neighbor_batch() {
        let (oracle, lattice, pose) = setup();
        let config = FusionConfig::default().with_strategy(ExtractionStrategy::NearestNeighbor);
        let mut sensor = DepthSensor::new(SensorModel::stereo().with_rays_per_axis(6), 3).unwrap();
        let batch = sensor.observe(&oracle, &pose, &lattice, &config, 2).unwrap();
        assert_eq!(batch.update_indices.len(), batch.num_samples());
        assert_eq!(batch.update_features.len(), batch.num_samples() * config.n_features);
    }

    #[test]
    fn test_same_seed_same_batch() {
        let (oracle, lattice, pose) = setup();
        let config = FusionConfig::default();
        let model = SensorModel::stereo().with_rays_per_axis(6);
        let mut a = DepthSensor::new(model.clone(), 9).unwrap();
        let mut b = DepthSensor::new(model, 9).unwrap();
        assert_eq!(
            a.observe(&oracle, &pose, &lattice, &config, 2).unwrap(),
            b.observe(&oracle, &pose, &lattice, &config, 2).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_model() {
        let model = SensorModel::tof().with_outlier_rate(1.5);
        assert!(matches!(DepthSensor::new(model, 0), Err(SimError::InvalidSensor { .. })));

        for noise_std in [-1.0, -1e-9, f64::NAN, f64::INFINITY] {
            let mut model = SensorModel::tof();
            model.noise_std = noise_std;
            assert!(matches!(DepthSensor::new(model, 0), Err(SimError::InvalidSensor { .. })));
        }

        let mut model = SensorModel::tof();
        model.noise_std = 0.0;
        assert!(DepthSensor::new(model, 0).is_ok());
    }
}
