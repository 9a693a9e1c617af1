//! Draco fragment decoding for `neuroglancer_multilod_draco` stores.

use draco_oxide_core::attribute::AttributeType;
use draco_oxide_core::types::{NdVector, PointIdx, Vector};
use draco_oxide_decoder::{AttributeTransform, Decoder};
use glam::Vec3;

use crate::MeshBuffer;
use crate::error::{DecodeError, DecodeResult};
use crate::fragment::FragmentDecoder;

/// Decodes Draco-compressed multi-resolution fragments.
///
/// Positions are taken before Draco's own dequantization, so a fragment
/// encoded with `vertex_quantization_bits` bits yields integer coordinates in
/// `[0, 2^bits - 1]`. [`dequantize`](crate::dequantize) then places them in
/// the fragment's grid cell, which is how Neuroglancer reads these stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct DracoFragments;

impl FragmentDecoder for DracoFragments {
    fn encoding(&self) -> &str {
        "draco"
    }

    fn decode(&self, data: &[u8]) -> DecodeResult<MeshBuffer> {
        if data.is_empty() {
            return Ok(MeshBuffer::default());
        }

        let portable = Decoder::new()
            .decode_mesh_portable(data)
            .map_err(|e| malformed(e.to_string()))?;

        let (index, positions) = portable
            .mesh
            .attributes
            .iter()
            .enumerate()
            .find(|(_, att)| att.get_attribute_type() == AttributeType::Position)
            .ok_or_else(|| malformed("no position attribute".to_string()))?;

        match portable.transforms.get(index) {
            Some(AttributeTransform::Quantized { .. } | AttributeTransform::Integer { .. }) => {}
            _ => return Err(malformed("positions are not quantized".to_string())),
        }
        if positions.get_num_components() != 3 {
            return Err(malformed(format!(
                "positions have {} components",
                positions.get_num_components()
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let vertices: Vec<Vec3> = (0..positions.len())
            .map(|p| {
                let q = positions.get::<NdVector<3, i32>, 3>(PointIdx::from(p));
                Vec3::new(*q.get(0) as f32, *q.get(1) as f32, *q.get(2) as f32)
            })
            .collect();

        let faces = portable
            .mesh
            .faces
            .iter()
            .map(|face| {
                let mut out = [0u32; 3];
                for (slot, point) in out.iter_mut().zip(face) {
                    let point = usize::from(*point);
                    *slot = u32::try_from(point)
                        .ok()
                        .filter(|_| point < vertices.len())
                        .ok_or_else(|| {
                            malformed(format!(
                                "face references point {point} of {}",
                                vertices.len()
                            ))
                        })?;
                }
                Ok(out)
            })
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(MeshBuffer { vertices, faces })
    }
}

fn malformed(detail: String) -> DecodeError {
    DecodeError::Malformed {
        context: "draco fragment",
        detail,
    }
}
