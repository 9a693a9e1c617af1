//! Multi-resolution mesh manifest (`.index`) decoding.

use std::ops::Range;

use glam::{UVec3, Vec3};

use crate::bytes::{read_f32_array, read_u32, read_u32_array};
use crate::error::{DecodeError, DecodeResult};

/// Fragments making up one level of detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LodFragments {
    /// Grid cell of each fragment, in units of `chunk_shape * 2^lod`.
    pub positions: Vec<UVec3>,
    /// Encoded size in bytes of each fragment.
    pub sizes: Vec<u32>,
}

impl LodFragments {
    /// Total encoded size of the fragments in this LOD.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.sizes.iter().map(|&s| u64::from(s)).sum()
    }
}

/// Decoded manifest for one segment.
///
/// # Format
///
/// All values little-endian:
///
/// - `chunk_shape`: 3 × f32
/// - `grid_origin`: 3 × f32
/// - `num_lods`: u32
/// - `lod_scales`: `num_lods` × f32
/// - `vertex_offsets`: `num_lods` × 3 × f32
/// - `num_fragments_per_lod`: `num_lods` × u32
/// - per LOD: `fragment_positions` (all x, then all y, then all z, u32) and
///   `fragment_sizes` (u32)
///
/// Fragment data is stored LOD-major in the same order as the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiLodManifest {
    pub chunk_shape: Vec3,
    pub grid_origin: Vec3,
    pub vertex_offsets: Vec<Vec3>,
    pub lods: Vec<LodFragments>,
}

impl MultiLodManifest {
    /// Decode a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is truncated or has trailing bytes.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut offset = 0;

        let chunk_shape = Vec3::from_slice(&read_f32_array(data, &mut offset, 3, "chunk shape")?);
        let grid_origin = Vec3::from_slice(&read_f32_array(data, &mut offset, 3, "grid origin")?);
        let num_lods = read_u32(data, &mut offset, "lod count")? as usize;

        // Scales only steer Neuroglancer's view-dependent LOD choice.
        read_f32_array(data, &mut offset, num_lods, "lod scales")?;
        let vertex_offsets = read_f32_array(data, &mut offset, num_lods * 3, "vertex offsets")?
            .chunks_exact(3)
            .map(Vec3::from_slice)
            .collect();
        let fragment_counts = read_u32_array(data, &mut offset, num_lods, "fragment counts")?;

        let mut lods = Vec::with_capacity(num_lods);
        for count in fragment_counts {
            let count = count as usize;
            let axes = read_u32_array(data, &mut offset, count * 3, "fragment positions")?;
            let positions = (0..count)
                .map(|i| UVec3::new(axes[i], axes[count + i], axes[count * 2 + i]))
                .collect();
            let sizes = read_u32_array(data, &mut offset, count, "fragment sizes")?;
            lods.push(LodFragments { positions, sizes });
        }

        if offset != data.len() {
            return Err(DecodeError::TrailingBytes {
                context: "mesh manifest",
                count: data.len() - offset,
            });
        }

        Ok(Self {
            chunk_shape,
            grid_origin,
            vertex_offsets,
            lods,
        })
    }

    #[must_use]
    pub fn num_lods(&self) -> usize {
        self.lods.len()
    }

    /// Fragments for `lod`, if the manifest has that many levels.
    #[must_use]
    pub fn lod(&self, lod: usize) -> Option<&LodFragments> {
        self.lods.get(lod)
    }

    /// Total encoded size of all fragments across every LOD.
    #[must_use]
    pub fn total_fragment_bytes(&self) -> u64 {
        self.lods.iter().map(LodFragments::total_bytes).sum()
    }

    /// Byte range of `lod`'s fragments relative to the start of the fragment data.
    #[must_use]
    pub fn lod_byte_range(&self, lod: usize) -> Option<Range<u64>> {
        let fragments = self.lods.get(lod)?;
        let start: u64 = self.lods[..lod].iter().map(LodFragments::total_bytes).sum();
        Some(start..start + fragments.total_bytes())
    }
}
