//! In-memory triangle mesh.

use glam::{Affine3A, Vec3};

use crate::error::{DecodeError, DecodeResult};

/// A triangle mesh: vertex positions plus vertex-index triples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuffer {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

impl MeshBuffer {
    #[must_use]
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// True when the mesh has neither vertices nor faces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.faces.is_empty()
    }

    /// Append another mesh, shifting its face indices past our vertices.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving `self` unchanged, if `other` has a face
    /// referencing a vertex it does not have or the merged mesh would have
    /// more vertices than `u32` indices can address.
    pub fn append(&mut self, other: MeshBuffer) -> DecodeResult<()> {
        let too_large = || DecodeError::Malformed {
            context: "merged mesh",
            detail: format!(
                "{} + {} vertices exceed u32 indices",
                self.vertices.len(),
                other.vertices.len()
            ),
        };
        let base = u32::try_from(self.vertices.len()).map_err(|_| too_large())?;
        u32::try_from(self.vertices.len() + other.vertices.len()).map_err(|_| too_large())?;

        let faces = other
            .faces
            .iter()
            .map(|face| {
                let mut out = [0u32; 3];
                for (slot, &index) in out.iter_mut().zip(face) {
                    if index as usize >= other.vertices.len() {
                        return Err(DecodeError::Malformed {
                            context: "merged mesh",
                            detail: format!(
                                "face references vertex {index} of {}",
                                other.vertices.len()
                            ),
                        });
                    }
                    *slot = index + base;
                }
                Ok(out)
            })
            .collect::<DecodeResult<Vec<_>>>()?;

        self.vertices.extend(other.vertices);
        self.faces.extend(faces);
        Ok(())
    }

    /// Apply an affine transform to every vertex in place.
    pub fn transform(&mut self, transform: &Affine3A) {
        for v in &mut self.vertices {
            *v = transform.transform_point3(*v);
        }
    }
}
