//! Sparse update reducer: scatter-reduce of colliding voxel indices.
//!
//! Entries are keyed by `ny*nz*ix + nz*iy + iz`, entries outside the lattice
//! are dropped, the rest are stable-sorted by key and consecutive equal keys
//! are summed channel by channel. Sums are accumulated in `f64`, so the
//! result does not depend on the order of entries inside a batch beyond
//! floating point associativity.

use crate::grid::{in_bounds, linear_key, VoxelIndex};

/// Deduplicated indices and their per-channel contribution sums.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coalesced {
    /// Unique in-bounds indices in ascending key order
    pub indices: Vec<VoxelIndex>,

    /// Linear key of each unique index
    pub keys: Vec<usize>,

    /// `width` sums per unique index, row-major
    pub sums: Vec<f64>,

    /// Channels per unique index
    pub width: usize,

    /// Entries discarded for lying outside the lattice
    pub dropped: usize,
}

impl Coalesced {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Channel sums of the `i`-th unique index.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.sums[i * self.width..(i + 1) * self.width]
    }
}

/// Sums `width`-channel contributions of entries that share a voxel.
///
/// `contributions` holds `width` values per entry of `indices`, row-major.
/// Out-of-bounds entries are skipped along with their contributions.
pub fn coalesce(
    indices: &[VoxelIndex],
    contributions: &[f64],
    width: usize,
    shape: [usize; 3],
) -> Coalesced {
    debug_assert_eq!(contributions.len(), indices.len() * width);

    let mut keyed: Vec<(usize, usize)> = indices
        .iter()
        .enumerate()
        .filter(|(_, index)| in_bounds(**index, shape))
        .map(|(pos, &index)| (linear_key(index, shape), pos))
        .collect();
    let dropped = indices.len() - keyed.len();

    // Stable: ties keep their batch order.
    keyed.sort_by_key(|&(key, _)| key);

    let mut out = Coalesced {
        width,
        dropped,
        ..Default::default()
    };

    for &(key, pos) in &keyed {
        let row = &contributions[pos * width..(pos + 1) * width];
        if out.keys.last() == Some(&key) {
            let start = out.sums.len() - width;
            for (acc, &value) in out.sums[start..].iter_mut().zip(row) {
                *acc += value;
            }
        } else {
            out.keys.push(key);
            out.indices.push(indices[pos]);
            out.sums.extend_from_slice(row);
        }
    }

    out
}

/// Unique in-bounds indices in ascending key order, with no contributions.
pub fn unique_indices(indices: &[VoxelIndex], shape: [usize; 3]) -> Coalesced {
    coalesce(indices, &[], 0, shape)
}
