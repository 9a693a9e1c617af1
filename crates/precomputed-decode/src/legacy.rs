//! Single-resolution ("legacy") fragment decoding.

use glam::Vec3;

use crate::MeshBuffer;
use crate::bytes::{read_f32_array, read_u32, read_u32_array};
use crate::error::{DecodeError, DecodeResult};

/// Decode a legacy mesh fragment.
///
/// # Format
///
/// - `num_vertices`: u32
/// - `positions`: `num_vertices` × 3 × f32
/// - `indices`: u32 triangle list filling the rest of the buffer
///
/// Positions are already in physical units.
///
/// # Errors
///
/// Returns an error if the buffer is truncated, the index data is not a
/// whole number of triangles, or an index names a missing vertex.
pub fn decode_legacy_fragment(data: &[u8]) -> DecodeResult<MeshBuffer> {
    if data.is_empty() {
        return Ok(MeshBuffer::default());
    }

    let mut offset = 0;
    let num_vertices = read_u32(data, &mut offset, "fragment vertex count")? as usize;
    let positions = read_f32_array(data, &mut offset, num_vertices * 3, "fragment positions")?;

    let remaining = data.len() - offset;
    if remaining % 12 != 0 {
        return Err(DecodeError::Malformed {
            context: "fragment indices",
            detail: format!("{remaining} bytes is not a whole number of triangles"),
        });
    }
    let indices = read_u32_array(data, &mut offset, remaining / 4, "fragment indices")?;
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= num_vertices) {
        return Err(DecodeError::Malformed {
            context: "fragment indices",
            detail: format!("index {bad} with {num_vertices} vertices"),
        });
    }

    let vertices = positions.chunks_exact(3).map(Vec3::from_slice).collect();
    let faces = indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();

    Ok(MeshBuffer { vertices, faces })
}
