//! Boolean voxel masks used to select evaluated voxels.

use crate::error::{FusionError, Result};
use crate::grid::{linear_key, VoxelGrid, VoxelIndex};

/// A dense boolean lattice with the same layout as [`VoxelGrid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelMask {
    shape: [usize; 3],
    bits: Vec<bool>,
}

impl VoxelMask {
    /// An all-false mask.
    pub fn empty(shape: [usize; 3]) -> Self {
        Self {
            shape,
            bits: vec![false; shape[0] * shape[1] * shape[2]],
        }
    }

    /// Marks every voxel whose channel-0 value satisfies `predicate`.
    pub fn from_predicate(grid: &VoxelGrid, predicate: impl Fn(f32) -> bool) -> Self {
        Self {
            shape: grid.shape(),
            bits: grid.scalar_values().into_iter().map(predicate).collect(),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn get(&self, index: VoxelIndex) -> bool {
        crate::grid::in_bounds(index, self.shape) && self.bits[linear_key(index, self.shape)]
    }

    /// Number of set voxels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// In-place logical OR with `other`.
    pub fn or_assign(&mut self, other: &VoxelMask) -> Result<()> {
        if other.shape != self.shape {
            return Err(FusionError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: other.shape.to_vec(),
            });
        }
        for (a, &b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= b;
        }
        Ok(())
    }

    /// Binary erosion by a 3×3×3 cube, one iteration.
    ///
    /// Neighbours outside the lattice count as unset, so the outermost layer
    /// of voxels is always cleared.
    pub fn erode(&self) -> Self {
        let mut bits = self.bits.clone();
        for axis in 0..3 {
            bits = self.erode_axis(&bits, axis);
        }
        Self {
            shape: self.shape,
            bits,
        }
    }

    // The cube is separable: eroding by a 3-voxel segment along each axis in
    // turn gives the same result.
    fn erode_axis(&self, bits: &[bool], axis: usize) -> Vec<bool> {
        let [nx, ny, nz] = self.shape;
        let stride = match axis {
            0 => ny * nz,
            1 => nz,
            _ => 1,
        };
        let extent = self.shape[axis];
        let mut out = vec![false; bits.len()];
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let pos = [x, y, z][axis];
                    if pos == 0 || pos + 1 >= extent {
                        continue;
                    }
                    let key = x * ny * nz + y * nz + z;
                    out[key] = bits[key] && bits[key - stride] && bits[key + stride];
                }
            }
        }
        out
    }
}
