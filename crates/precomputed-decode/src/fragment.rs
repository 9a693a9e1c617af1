//! Multi-resolution fragment decoding and dequantization.

use glam::{UVec3, Vec3};

use crate::MeshBuffer;
use crate::error::{DecodeError, DecodeResult};
use crate::manifest::MultiLodManifest;

/// Decodes the geometry of one multi-resolution fragment.
///
/// Implementations return vertex positions in quantized fragment space
/// (integers in `[0, 2^bits - 1]` stored as floats). The caller maps them
/// into model space with [`dequantize`]. [`DracoFragments`](crate::DracoFragments)
/// handles `neuroglancer_multilod_draco` stores.
pub trait FragmentDecoder: Send + Sync {
    /// Name of the encoding this decoder accepts, e.g. `"draco"`.
    fn encoding(&self) -> &str;

    /// Decode one fragment.
    fn decode(&self, data: &[u8]) -> DecodeResult<MeshBuffer>;
}

/// Map quantized fragment vertices into model space.
///
/// `position = grid_origin + vertex_offsets[lod]
///     + chunk_shape * 2^lod * (fragment_position + q / (2^bits - 1))`
///
/// # Errors
///
/// Returns an error if `lod` is missing from the manifest or
/// `quantization_bits` is outside `1..=32`.
pub fn dequantize(
    mesh: &mut MeshBuffer,
    manifest: &MultiLodManifest,
    lod: usize,
    fragment_position: UVec3,
    quantization_bits: u32,
) -> DecodeResult<()> {
    if !(1..=32).contains(&quantization_bits) {
        return Err(DecodeError::Malformed {
            context: "vertex quantization",
            detail: format!("{quantization_bits} bits is out of range"),
        });
    }

    let vertex_offset = manifest
        .vertex_offsets
        .get(lod)
        .copied()
        .ok_or_else(|| DecodeError::Malformed {
            context: "vertex offsets",
            detail: format!("no offset for lod {lod}"),
        })?;

    #[allow(clippy::cast_precision_loss)]
    let max_quantized = ((1u64 << quantization_bits) - 1) as f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let lod_scale = 2f32.powi(lod as i32);
    let cell_size = manifest.chunk_shape * lod_scale;
    let origin = manifest.grid_origin + vertex_offset;
    let cell = fragment_position.as_vec3();

    for v in &mut mesh.vertices {
        *v = origin + cell_size * (cell + *v / max_quantized);
    }

    Ok(())
}
