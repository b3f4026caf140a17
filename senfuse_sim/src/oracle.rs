//! Ground truth oracle for simulation.
//!
//! The Oracle owns the analytic scene:
//! - Signed distance of every world point
//! - Ray casting for ideal depth measurements
//! - Camera trajectory around the scene
//! - The truncated ground-truth grid handed to the scene database

use crate::error::SimResult;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use senfuse_core::VoxelGrid;
use serde::{Deserialize, Serialize};

const MAX_MARCH_STEPS: usize = 512;
const HIT_EPSILON: f64 = 1e-4;
const MIN_MARCH_STEP: f64 = 1e-3;
const NORMAL_STEP: f64 = 1e-4;

/// Lattice the simulated grids live on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub dims: [usize; 3],
    pub voxel_size: f64,
    pub origin: Vector3<f64>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            dims: [40, 40, 40],
            voxel_size: 0.05,
            origin: Vector3::new(-1.0, -1.0, 0.0),
        }
    }
}

impl GridSpec {
    /// World-space center of the lattice.
    pub fn center(&self) -> Vector3<f64> {
        let extent = Vector3::new(self.dims[0] as f64, self.dims[1] as f64, self.dims[2] as f64);
        self.origin + extent * (0.5 * self.voxel_size)
    }
}

/// Analytic scene geometry, negative inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SceneShape {
    /// A ball resting above a ground plane
    SphereOnPlane {
        center: Vector3<f64>,
        radius: f64,
        ground: f64,
    },

    /// An axis-aligned box above a ground plane
    BoxOnPlane {
        center: Vector3<f64>,
        half_extents: Vector3<f64>,
        ground: f64,
    },
}

impl SceneShape {
    /// Signed distance of `p` to the surface.
    pub fn sdf(&self, p: &Vector3<f64>) -> f64 {
        match *self {
            SceneShape::SphereOnPlane {
                center,
                radius,
                ground,
            } => ((p - center).norm() - radius).min(p.z - ground),
            SceneShape::BoxOnPlane {
                center,
                half_extents,
                ground,
            } => {
                let q = (p - center).abs() - half_extents;
                let outside = q.map(|c| c.max(0.0)).norm();
                let inside = q.x.max(q.y).max(q.z).min(0.0);
                (outside + inside).min(p.z - ground)
            }
        }
    }

    /// Unit surface normal at `p` by central differences.
    pub fn normal(&self, p: &Vector3<f64>) -> Vector3<f64> {
        let h = NORMAL_STEP;
        let gradient = Vector3::new(
            self.sdf(&(p + Vector3::x() * h)) - self.sdf(&(p - Vector3::x() * h)),
            self.sdf(&(p + Vector3::y() * h)) - self.sdf(&(p - Vector3::y() * h)),
            self.sdf(&(p + Vector3::z() * h)) - self.sdf(&(p - Vector3::z() * h)),
        );
        gradient.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z)
    }
}

/// A camera position looking at a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vector3<f64>,
    pub target: Vector3<f64>,
}

impl CameraPose {
    /// Unit viewing direction.
    pub fn forward(&self) -> Vector3<f64> {
        (self.target - self.position)
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(|| -Vector3::z())
    }
}

/// The Oracle - owns one scene and its camera trajectory.
pub struct Oracle {
    /// Scene name used as database id
    name: String,

    shape: SceneShape,

    grid: GridSpec,

    /// RNG for trajectory jitter
    physics_rng: ChaCha8Rng,

    /// Orbit radius around the lattice center (meters)
    orbit_radius: f64,

    /// Camera height above the lattice center (meters)
    orbit_height: f64,

    /// Maximum angular jitter per pose (radians)
    pose_jitter: f64,
}

impl Oracle {
    /// Creates an Oracle for `shape` on `grid`.
    pub fn new(name: &str, shape: SceneShape, grid: GridSpec, physics_seed: u64) -> Self {
        Self {
            name: name.to_string(),
            shape,
            grid,
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            orbit_radius: 1.8,
            orbit_height: 0.9,
            pose_jitter: 0.05,
        }
    }

    /// Ball above the ground, centered on the lattice.
    pub fn sphere_scene(grid: GridSpec, physics_seed: u64) -> Self {
        let center = grid.center();
        let shape = SceneShape::SphereOnPlane {
            center: center - Vector3::z() * 0.1,
            radius: 0.4,
            ground: grid.origin.z + 0.3,
        };
        Self::new("sphere_plane", shape, grid, physics_seed)
    }

    /// Box above the ground, centered on the lattice.
    pub fn box_scene(grid: GridSpec, physics_seed: u64) -> Self {
        let center = grid.center();
        let shape = SceneShape::BoxOnPlane {
            center: center - Vector3::z() * 0.2,
            half_extents: Vector3::new(0.4, 0.3, 0.35),
            ground: grid.origin.z + 0.3,
        };
        Self::new("box_plane", shape, grid, physics_seed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &SceneShape {
        &self.shape
    }

    pub fn grid_spec(&self) -> &GridSpec {
        &self.grid
    }

    /// Signed distances at voxel centers, clamped to `[-trunc, trunc]`.
    pub fn ground_truth_grid(&self, trunc: f32) -> SimResult<VoxelGrid> {
        let mut grid =
            VoxelGrid::filled(self.grid.dims, trunc).with_placement(self.grid.origin, self.grid.voxel_size);
        let [nx, ny, nz] = self.grid.dims;
        let mut values = Vec::with_capacity(nx * ny * nz);
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let center = grid.voxel_to_world([x as i64, y as i64, z as i64]);
                    values.push((self.shape.sdf(&center) as f32).clamp(-trunc, trunc));
                }
            }
        }
        grid.from_array(&values, self.grid.dims, None)?;
        Ok(grid)
    }

    /// Distance along `direction` to the first surface, if within `max_range`.
    pub fn cast_ray(&self, origin: &Vector3<f64>, direction: &Vector3<f64>, max_range: f64) -> Option<f64> {
        let mut t = 0.0;
        for _ in 0..MAX_MARCH_STEPS {
            if t > max_range {
                return None;
            }
            let d = self.shape.sdf(&(origin + direction * t));
            if d < HIT_EPSILON {
                return Some(t);
            }
            t += d.max(MIN_MARCH_STEP);
        }
        None
    }

    /// Pose `frame` of `frames` on a jittered orbit around the scene.
    pub fn camera_pose(&mut self, frame: usize, frames: usize) -> CameraPose {
        let center = self.grid.center();
        let base = std::f64::consts::TAU * frame as f64 / frames.max(1) as f64;
        let angle = base + self.physics_rng.gen_range(-self.pose_jitter..=self.pose_jitter);
        let position = center
            + Vector3::new(
                self.orbit_radius * angle.cos(),
                self.orbit_radius * angle.sin(),
                self.orbit_height,
            );
        CameraPose {
            position,
            target: center - Vector3::z() * 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_sdf() {
        let shape = SceneShape::SphereOnPlane {
            center: Vector3::new(0.0, 0.0, 1.0),
            radius: 0.5,
            ground: 0.0,
        };
        assert_relative_eq!(shape.sdf(&Vector3::new(0.0, 0.0, 1.0)), -0.5);
        assert_relative_eq!(shape.sdf(&Vector3::new(1.0, 0.0, 1.0)), 0.5);
        // The ground is closer below the ball.
        assert_relative_eq!(shape.sdf(&Vector3::new(3.0, 0.0, 0.2)), 0.2);
    }

    #[test]
    fn test_box_sdf() {
        let shape = SceneShape::BoxOnPlane {
            center: Vector3::new(0.0, 0.0, 1.0),
            half_extents: Vector3::new(0.5, 0.5, 0.5),
            ground: -10.0,
        };
        assert_relative_eq!(shape.sdf(&Vector3::new(0.0, 0.0, 1.0)), -0.5);
        assert_relative_eq!(shape.sdf(&Vector3::new(1.0, 0.0, 1.0)), 0.5);
        let normal = shape.normal(&Vector3::new(0.5, 0.0, 1.0));
        assert_relative_eq!(normal.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cast_ray_hits_ground() {
        let oracle = Oracle::sphere_scene(GridSpec::default(), 42);
        let origin = Vector3::new(0.9, 0.9, 1.5);
        let depth = oracle.cast_ray(&origin, &-Vector3::z(), 5.0).unwrap();
        assert_relative_eq!(depth, 1.2, epsilon = 1e-3);
        assert!(oracle.cast_ray(&origin, &Vector3::z(), 5.0).is_none());
    }

    #[test]
    fn test_ground_truth_is_truncated() {
        let oracle = Oracle::box_scene(GridSpec::default(), 42);
        let gt = oracle.ground_truth_grid(0.1).unwrap();
        let values = gt.scalar_values();
        assert!(values.iter().all(|&v| (-0.1..=0.1).contains(&v)));
        assert!(values.iter().any(|&v| v < 0.0));
        assert_eq!(gt.shape(), [40, 40, 40]);
        assert_eq!(gt.voxel_size, 0.05);
    }

    #[test]
    fn test_deterministic_trajectory() {
        let mut a = Oracle::sphere_scene(GridSpec::default(), 7);
        let mut b = Oracle::sphere_scene(GridSpec::default(), 7);
        for frame in 0..5 {
            assert_eq!(a.camera_pose(frame, 5), b.camera_pose(frame, 5));
        }
    }
}
