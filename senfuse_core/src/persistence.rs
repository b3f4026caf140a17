//! Grid dataset files.
//!
//! One file holds one named dense array:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ HEADER (32 bytes, little endian)                                   │
//! │  0-3:   Magic "SFVG"                                               │
//! │  4-5:   version (u16)                                              │
//! │  6-7:   dtype (u16, 1 = f16)                                       │
//! │  8-11:  channels (u32)                                             │
//! │ 12-23:  nx, ny, nz (u32 each)                                      │
//! │ 24-25:  name length in bytes (u16)                                 │
//! │ 26-31:  reserved                                                   │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ NAME (utf-8)                                                       │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ PLACEMENT: origin x, y, z, voxel_size (f64 each)                   │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ PAYLOAD: gzip stream of nx*ny*nz*channels f16 words, C order       │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are stored at the grid's own precision, so a round trip is
//! bit-exact.

use crate::error::{FusionError, Result};
use crate::grid::VoxelGrid;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use half::f16;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes of a grid dataset file.
pub const DATASET_MAGIC: [u8; 4] = *b"SFVG";

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

const DTYPE_F16: u16 = 1;

const MAX_PREALLOCATED_BYTES: usize = 64 << 20;

/// A dataset read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDataset {
    pub name: String,
    pub shape: [usize; 3],
    pub channels: usize,
    pub origin: Vector3<f64>,
    pub voxel_size: f64,
    pub values: Vec<f16>,
}

impl StoredDataset {
    /// Rebuilds the grid, including its placement.
    pub fn into_grid(self) -> Result<VoxelGrid> {
        let grid = VoxelGrid::from_raw(self.shape, self.channels, self.values)?;
        Ok(grid.with_placement(self.origin, self.voxel_size))
    }
}

/// Writes `grid` as a dataset called `name`.
pub fn write_dataset(path: impl AsRef<Path>, name: &str, grid: &VoxelGrid) -> Result<()> {
    let name_bytes = name.as_bytes();
    let name_len = u16::try_from(name_bytes.len())
        .map_err(|_| FusionError::format(format!("dataset name too long: {} bytes", name_bytes.len())))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&DATASET_MAGIC);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[6..8].copy_from_slice(&DTYPE_F16.to_le_bytes());
    header[8..12].copy_from_slice(&dim_to_u32(grid.channels())?.to_le_bytes());
    for (axis, &n) in grid.shape().iter().enumerate() {
        let start = 12 + axis * 4;
        header[start..start + 4].copy_from_slice(&dim_to_u32(n)?.to_le_bytes());
    }
    header[24..26].copy_from_slice(&name_len.to_le_bytes());

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header)?;
    writer.write_all(name_bytes)?;
    for component in [grid.origin.x, grid.origin.y, grid.origin.z, grid.voxel_size] {
        writer.write_all(&component.to_le_bytes())?;
    }

    let mut encoder = GzEncoder::new(writer, Compression::best());
    for value in grid.as_slice() {
        encoder.write_all(&value.to_le_bytes())?;
    }
    encoder.finish()?.flush()?;
    Ok(())
}

/// Reads a dataset written by [`write_dataset`].
pub fn read_dataset(path: impl AsRef<Path>) -> Result<StoredDataset> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    if header[0..4] != DATASET_MAGIC {
        return Err(FusionError::format("bad magic bytes"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(FusionError::format(format!("unsupported version {}", version)));
    }
    let dtype = u16::from_le_bytes([header[6], header[7]]);
    if dtype != DTYPE_F16 {
        return Err(FusionError::format(format!("unsupported dtype {}", dtype)));
    }
    let read_u32 = |at: usize| {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]) as usize
    };
    let channels = read_u32(8);
    let shape = [read_u32(12), read_u32(16), read_u32(20)];
    let name_len = u16::from_le_bytes([header[24], header[25]]) as usize;

    let mut name = vec![0u8; name_len];
    reader.read_exact(&mut name)?;
    let name = String::from_utf8(name).map_err(|_| FusionError::format("dataset name is not utf-8"))?;

    let mut placement = [0f64; 4];
    for component in placement.iter_mut() {
        let mut bytes = [0u8; 8];
        reader.read_exact(&mut bytes)?;
        *component = f64::from_le_bytes(bytes);
    }

    let bytes = shape
        .iter()
        .chain([&channels, &2])
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| FusionError::format(format!("shape {:?} x {} overflows", shape, channels)))?;

    // The header is untrusted: grow with the stream and stop one byte past the claim.
    let mut payload = Vec::with_capacity(bytes.min(MAX_PREALLOCATED_BYTES));
    GzDecoder::new(reader)
        .take((bytes as u64).saturating_add(1))
        .read_to_end(&mut payload)?;
    if payload.len() != bytes {
        return Err(FusionError::format(format!(
            "payload holds {} bytes, expected {}",
            payload.len(),
            bytes
        )));
    }
    let values = payload
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(StoredDataset {
        name,
        shape,
        channels,
        origin: Vector3::new(placement[0], placement[1], placement[2]),
        voxel_size: placement[3],
        values,
    })
}

fn dim_to_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| FusionError::format(format!("dimension {} exceeds u32", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.vgz");

        let mut grid = VoxelGrid::filled_channels([3, 4, 5], 2, 0.1)
            .with_placement(Vector3::new(-1.5, 0.25, 3.0), 0.02);
        grid.write_channels([2, 3, 4], &[-0.0371, 12.5]).unwrap();
        grid.write_channels([0, 1, 0], &[f32::MIN_POSITIVE, -65504.0]).unwrap();

        write_dataset(&path, "features", &grid).unwrap();
        let stored = read_dataset(&path).unwrap();

        assert_eq!(stored.name, "features");
        assert_eq!(stored.shape, [3, 4, 5]);
        assert_eq!(stored.channels, 2);
        let restored = stored.into_grid().unwrap();
        assert_eq!(restored.as_slice(), grid.as_slice());
        assert_eq!(restored.origin, grid.origin);
        assert_eq!(restored.voxel_size, grid.voxel_size);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(matches!(read_dataset(&path), Err(FusionError::Format(_))));
    }

    #[test]
    fn test_rejects_overflowing_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.vgz");
        write_dataset(&path, "TSDF", &VoxelGrid::filled([2, 2, 2], 0.5)).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..24].copy_from_slice(&[0xFF; 16]);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_dataset(&path), Err(FusionError::Format(_))));
    }

    #[test]
    fn test_rejects_oversized_payload_claim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.vgz");
        write_dataset(&path, "TSDF", &VoxelGrid::filled([2, 2, 2], 0.5)).unwrap();

        // Large but representable: the stream ends long before the claim.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12..24].copy_from_slice(&[0x00, 0x00, 0x01, 0x00].repeat(3));
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(read_dataset(&path), Err(FusionError::Format(_))));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.vgz");
        write_dataset(&path, "TSDF", &VoxelGrid::filled([4, 4, 4], 0.5)).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // Claim a larger grid than the payload holds.
        bytes[12] = 8;
        std::fs::write(&path, bytes).unwrap();
        assert!(read_dataset(&path).is_err());
    }
}
