//! Dense voxel grids with world-space placement.
//!
//! Every grid owns its own buffer of half-precision words. Grids belonging
//! to one scene share a shape but never share storage: cloning a grid copies
//! the buffer, so per-sensor and fused grids cannot alias each other.

use crate::error::{FusionError, Result};
use half::f16;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Integer voxel coordinates `(ix, iy, iz)`.
///
/// Signed so producers can emit out-of-range candidates that the reducer drops.
pub type VoxelIndex = [i64; 3];

/// Axis-aligned world-space extent of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl BoundingBox {
    /// Extent covered by `shape` voxels of `voxel_size` starting at `origin`.
    pub fn from_lattice(origin: Vector3<f64>, voxel_size: f64, shape: [usize; 3]) -> Self {
        let extent = Vector3::new(shape[0] as f64, shape[1] as f64, shape[2] as f64) * voxel_size;
        Self {
            min: origin,
            max: origin + extent,
        }
    }
}

/// A dense 3-D lattice of scalar or vector values.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    shape: [usize; 3],
    channels: usize,
    data: Vec<f16>,

    /// World-space corner of voxel (0, 0, 0)
    pub origin: Vector3<f64>,

    /// Edge length of one voxel in meters
    pub voxel_size: f64,

    /// Optional world extent
    pub bbox: Option<BoundingBox>,
}

impl VoxelGrid {
    /// Allocates a scalar grid with every voxel set to `value`.
    pub fn filled(shape: [usize; 3], value: f32) -> Self {
        Self::filled_channels(shape, 1, value)
    }

    /// Allocates a grid with `channels` values per voxel, all set to `value`.
    pub fn filled_channels(shape: [usize; 3], channels: usize, value: f32) -> Self {
        let len = shape[0] * shape[1] * shape[2] * channels;
        Self {
            shape,
            channels,
            data: vec![f16::from_f32(value); len],
            origin: Vector3::zeros(),
            voxel_size: 1.0,
            bbox: None,
        }
    }

    /// Builds a grid from raw half-precision words.
    pub fn from_raw(shape: [usize; 3], channels: usize, data: Vec<f16>) -> Result<Self> {
        let expected = shape[0] * shape[1] * shape[2] * channels;
        if data.len() != expected {
            return Err(FusionError::ShapeMismatch {
                expected: vec![shape[0], shape[1], shape[2], channels],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape,
            channels,
            data,
            origin: Vector3::zeros(),
            voxel_size: 1.0,
            bbox: None,
        })
    }

    /// Sets the world placement.
    pub fn with_placement(mut self, origin: Vector3<f64>, voxel_size: f64) -> Self {
        self.origin = origin;
        self.voxel_size = voxel_size;
        self.bbox = Some(BoundingBox::from_lattice(origin, voxel_size, self.shape));
        self
    }

    /// Allocates a grid on the same lattice and placement as `self`.
    pub fn like(&self, channels: usize, value: f32) -> Self {
        let mut grid = Self::filled_channels(self.shape, channels, value);
        grid.origin = self.origin;
        grid.voxel_size = self.voxel_size;
        grid.bbox = self.bbox;
        grid
    }

    /// Replaces the stored content.
    ///
    /// Fails if `shape` differs from the grid's declared shape or if the
    /// number of values does not match it.
    pub fn from_array(
        &mut self,
        values: &[f32],
        shape: [usize; 3],
        bbox: Option<BoundingBox>,
    ) -> Result<()> {
        if shape != self.shape {
            return Err(FusionError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: shape.to_vec(),
            });
        }
        if values.len() != self.data.len() {
            return Err(FusionError::length("volume", self.data.len(), values.len()));
        }
        for (slot, &value) in self.data.iter_mut().zip(values) {
            *slot = f16::from_f32(value);
        }
        if let Some(bbox) = bbox {
            self.origin = bbox.min;
            self.bbox = Some(bbox);
        }
        Ok(())
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of voxels (not values).
    pub fn num_voxels(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    pub fn as_slice(&self) -> &[f16] {
        &self.data
    }

    /// Whether `index` lies inside `[0,nx)×[0,ny)×[0,nz)`.
    pub fn contains(&self, index: VoxelIndex) -> bool {
        in_bounds(index, self.shape)
    }

    /// Linear voxel key `ny*nz*ix + nz*iy + iz`, or `None` outside the lattice.
    pub fn linear_index(&self, index: VoxelIndex) -> Option<usize> {
        if self.contains(index) {
            Some(linear_key(index, self.shape))
        } else {
            None
        }
    }

    /// Reads channel 0 at `index`.
    pub fn read(&self, index: VoxelIndex) -> Option<f32> {
        self.linear_index(index)
            .map(|key| self.data[key * self.channels].to_f32())
    }

    /// Reads every channel at `index`.
    pub fn read_channels(&self, index: VoxelIndex) -> Option<Vec<f32>> {
        self.linear_index(index).map(|key| self.channels_at(key))
    }

    /// Writes channel 0 at `index`.
    pub fn write(&mut self, index: VoxelIndex, value: f32) -> Result<()> {
        let key = self.checked_key(index)?;
        self.data[key * self.channels] = f16::from_f32(value);
        Ok(())
    }

    /// Writes every channel at `index`.
    pub fn write_channels(&mut self, index: VoxelIndex, values: &[f32]) -> Result<()> {
        if values.len() != self.channels {
            return Err(FusionError::FeatureWidth {
                expected: self.channels,
                got: values.len(),
            });
        }
        let key = self.checked_key(index)?;
        self.set_channels(key, values);
        Ok(())
    }

    /// Resets every value in place.
    pub fn fill(&mut self, value: f32) {
        let value = f16::from_f32(value);
        self.data.iter_mut().for_each(|slot| *slot = value);
    }

    /// Copies the content widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.iter().map(|v| v.to_f32()).collect()
    }

    /// Channel 0 at every voxel, widened to `f32`.
    pub fn scalar_values(&self) -> Vec<f32> {
        self.data
            .iter()
            .step_by(self.channels.max(1))
            .map(|v| v.to_f32())
            .collect()
    }

    /// Continuous voxel coordinates of a world point (voxel centers are integral).
    pub fn world_to_voxel(&self, point: &Vector3<f64>) -> Vector3<f64> {
        (point - self.origin) / self.voxel_size - Vector3::repeat(0.5)
    }

    /// World position of a voxel center.
    pub fn voxel_to_world(&self, index: VoxelIndex) -> Vector3<f64> {
        let idx = Vector3::new(index[0] as f64, index[1] as f64, index[2] as f64);
        self.origin + (idx + Vector3::repeat(0.5)) * self.voxel_size
    }

    pub(crate) fn value_at(&self, key: usize) -> f32 {
        self.data[key * self.channels].to_f32()
    }

    pub(crate) fn set_value(&mut self, key: usize, value: f32) {
        self.data[key * self.channels] = f16::from_f32(value);
    }

    pub(crate) fn channels_at(&self, key: usize) -> Vec<f32> {
        let start = key * self.channels;
        self.data[start..start + self.channels]
            .iter()
            .map(|v| v.to_f32())
            .collect()
    }

    pub(crate) fn set_channels(&mut self, key: usize, values: &[f32]) {
        let start = key * self.channels;
        for (slot, &value) in self.data[start..start + self.channels].iter_mut().zip(values) {
            *slot = f16::from_f32(value);
        }
    }

    fn checked_key(&self, index: VoxelIndex) -> Result<usize> {
        self.linear_index(index).ok_or(FusionError::IndexOutOfBounds {
            index,
            shape: self.shape,
        })
    }
}

/// Whether `index` lies inside a lattice of `shape`.
pub fn in_bounds(index: VoxelIndex, shape: [usize; 3]) -> bool {
    index
        .iter()
        .zip(shape.iter())
        .all(|(&i, &n)| i >= 0 && (i as u64) < n as u64)
}

/// Linear key of an in-bounds index: `ny*nz*ix + nz*iy + iz`.
pub fn linear_key(index: VoxelIndex, shape: [usize; 3]) -> usize {
    let [_, ny, nz] = shape;
    ny * nz * index[0] as usize + nz * index[1] as usize + index[2] as usize
}

/// Inverse of [`linear_key`].
pub fn index_from_key(key: usize, shape: [usize; 3]) -> VoxelIndex {
    let [_, ny, nz] = shape;
    [
        (key / (ny * nz)) as i64,
        ((key / nz) % ny) as i64,
        (key % nz) as i64,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_read_write_roundtrip() {
        let mut grid = VoxelGrid::filled([4, 5, 6], 0.0);
        grid.write([1, 2, 3], 0.25).unwrap();
        assert_eq!(grid.read([1, 2, 3]), Some(0.25));
        assert_eq!(grid.read([0, 0, 0]), Some(0.0));
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut grid = VoxelGrid::filled([4, 4, 4], 0.0);
        assert_eq!(grid.read([4, 0, 0]), None);
        assert_eq!(grid.read([0, -1, 0]), None);
        assert!(matches!(
            grid.write([0, 0, 7], 1.0),
            Err(FusionError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_linear_key_layout() {
        let shape = [3, 4, 5];
        assert_eq!(linear_key([0, 0, 1], shape), 1);
        assert_eq!(linear_key([0, 1, 0], shape), 5);
        assert_eq!(linear_key([1, 0, 0], shape), 20);
        assert_eq!(index_from_key(linear_key([2, 3, 4], shape), shape), [2, 3, 4]);
    }

    #[test]
    fn test_from_array_rejects_other_shape() {
        let mut grid = VoxelGrid::filled([2, 2, 2], 0.0);
        let values = vec![1.0; 8];
        assert!(grid.from_array(&values, [2, 4, 1], None).is_err());
        grid.from_array(&values, [2, 2, 2], None).unwrap();
        assert!(grid.to_f32_vec().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_from_array_sets_origin_from_bbox() {
        let mut grid = VoxelGrid::filled([2, 2, 2], 0.0);
        let bbox = BoundingBox {
            min: Vector3::new(-1.0, -2.0, -3.0),
            max: Vector3::new(1.0, 0.0, -1.0),
        };
        grid.from_array(&[0.5; 8], [2, 2, 2], Some(bbox)).unwrap();
        assert_eq!(grid.origin, Vector3::new(-1.0, -2.0, -3.0));
    }

    #[test]
    fn test_channel_access() {
        let mut grid = VoxelGrid::filled_channels([2, 2, 2], 3, 0.0);
        grid.write_channels([1, 1, 1], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(grid.read_channels([1, 1, 1]), Some(vec![1.0, 2.0, 3.0]));
        assert!(grid.write_channels([1, 1, 1], &[1.0]).is_err());
    }

    #[test]
    fn test_clones_do_not_alias() {
        let a = VoxelGrid::filled([2, 2, 2], 0.1);
        let mut b = a.clone();
        b.write([0, 0, 0], -1.0).unwrap();
        assert_relative_eq!(a.read([0, 0, 0]).unwrap(), 0.1, epsilon = 1e-3);
    }

    #[test]
    fn test_world_voxel_transform() {
        let grid = VoxelGrid::filled([10, 10, 10], 0.0)
            .with_placement(Vector3::new(1.0, 0.0, 0.0), 0.5);
        let center = grid.voxel_to_world([2, 0, 0]);
        assert_relative_eq!(center.x, 2.25, epsilon = 1e-12);
        let back = grid.world_to_voxel(&center);
        assert_relative_eq!(back.x, 2.0, epsilon = 1e-12);
    }
}
