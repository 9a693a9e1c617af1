//! Metadata types for precomputed volumes.
//!
//! These mirror the JSON `info` files a precomputed segmentation publishes:
//! the volume info at the root and the mesh info inside the mesh directory.

use glam::{Affine3A, Mat3, Vec3};
use precomputed_decode::{HashFunction, ShardLayout};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Mesh `@type` of single-resolution meshes.
pub const LEGACY_MESH_TYPE: &str = "neuroglancer_legacy_mesh";
/// Mesh `@type` of multi-resolution, Draco-encoded meshes.
pub const MULTILOD_DRACO_TYPE: &str = "neuroglancer_multilod_draco";
/// Sharding `@type` understood by this crate.
pub const SHARDED_TYPE: &str = "neuroglancer_uint64_sharded_v1";

/// Root `info` of a precomputed volume. Only the fields needed for meshes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeInfo {
    /// Volume type, e.g. `"segmentation"`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Mesh directory relative to the volume root.
    #[serde(default)]
    pub mesh: Option<String>,
}

impl VolumeInfo {
    /// Mesh directory name, defaulting to `"mesh"`.
    #[must_use]
    pub fn mesh_dir(&self) -> &str {
        self.mesh.as_deref().unwrap_or("mesh")
    }
}

/// How the chunks in a sharded store are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    #[default]
    Raw,
    Gzip,
}

/// Sharding specification from a mesh info.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardingSpec {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default)]
    pub preshift_bits: u32,
    pub hash: String,
    pub minishard_bits: u32,
    pub shard_bits: u32,
    #[serde(default)]
    pub minishard_index_encoding: DataEncoding,
    #[serde(default)]
    pub data_encoding: DataEncoding,
}

impl ShardingSpec {
    /// Convert to the layout used for key placement.
    pub fn layout(&self) -> Result<ShardLayout> {
        if self.kind != SHARDED_TYPE {
            return Err(Error::InvalidData {
                context: "sharding spec",
                detail: format!("unsupported sharding type {:?}", self.kind),
            });
        }
        let hash = HashFunction::from_name(&self.hash).ok_or_else(|| Error::InvalidData {
            context: "sharding spec",
            detail: format!("unsupported hash {:?}", self.hash),
        })?;
        if self.preshift_bits >= 64 || self.minishard_bits >= 32 || self.shard_bits >= 64 {
            return Err(Error::InvalidData {
                context: "sharding spec",
                detail: "bit counts out of range".to_string(),
            });
        }
        Ok(ShardLayout {
            preshift_bits: self.preshift_bits,
            hash,
            minishard_bits: self.minishard_bits,
            shard_bits: self.shard_bits,
        })
    }
}

/// The `info` file inside a mesh directory.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshInfo {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default)]
    pub vertex_quantization_bits: Option<u32>,
    /// Row-major 3×4 affine transform from stored to model coordinates.
    #[serde(default)]
    pub transform: Option<Vec<f32>>,
    #[serde(default)]
    pub sharding: Option<ShardingSpec>,
}

impl MeshInfo {
    /// The stored transform as an affine matrix (identity when absent).
    pub fn affine(&self) -> Result<Affine3A> {
        let Some(t) = &self.transform else {
            return Ok(Affine3A::IDENTITY);
        };
        if t.len() != 12 {
            return Err(Error::InvalidData {
                context: "mesh transform",
                detail: format!("expected 12 values, got {}", t.len()),
            });
        }
        let matrix = Mat3::from_cols(
            Vec3::new(t[0], t[4], t[8]),
            Vec3::new(t[1], t[5], t[9]),
            Vec3::new(t[2], t[6], t[10]),
        );
        let translation = Vec3::new(t[3], t[7], t[11]);
        Ok(Affine3A::from_mat3_translation(matrix, translation))
    }
}

/// Geometry encoding of a mesh directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshKind {
    /// One manifest listing whole-resolution fragments per `segment:lod`.
    Legacy,
    /// Multi-resolution manifests with quantized fragments.
    MultiLod,
}

/// Everything a connection needs to know about a mesh directory.
#[derive(Debug, Clone)]
pub struct MeshLayout {
    pub kind: MeshKind,
    /// Vertex quantization bits for multi-resolution fragments.
    pub quantization_bits: u32,
    /// Stored-to-model transform for multi-resolution fragments.
    pub transform: Affine3A,
    /// Sharding parameters, when the directory is sharded.
    pub sharding: Option<Sharding>,
}

/// Resolved sharding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sharding {
    pub layout: ShardLayout,
    pub minishard_index_encoding: DataEncoding,
    pub data_encoding: DataEncoding,
}

impl MeshLayout {
    /// The layout assumed when a mesh directory has no `info` file.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            kind: MeshKind::Legacy,
            quantization_bits: 0,
            transform: Affine3A::IDENTITY,
            sharding: None,
        }
    }

    /// Interpret a mesh info.
    pub fn from_info(info: &MeshInfo) -> Result<Self> {
        let kind = match info.kind.as_str() {
            LEGACY_MESH_TYPE => MeshKind::Legacy,
            MULTILOD_DRACO_TYPE => MeshKind::MultiLod,
            other => {
                return Err(Error::InvalidData {
                    context: "mesh info",
                    detail: format!("unsupported mesh type {other:?}"),
                });
            }
        };

        let sharding = info
            .sharding
            .as_ref()
            .map(|spec| {
                Ok::<_, Error>(Sharding {
                    layout: spec.layout()?,
                    minishard_index_encoding: spec.minishard_index_encoding,
                    data_encoding: spec.data_encoding,
                })
            })
            .transpose()?;

        let quantization_bits = match kind {
            MeshKind::Legacy => 0,
            MeshKind::MultiLod => info.vertex_quantization_bits.ok_or_else(|| Error::InvalidData {
                context: "mesh info",
                detail: "missing vertex_quantization_bits".to_string(),
            })?,
        };

        Ok(Self {
            kind,
            quantization_bits,
            transform: info.affine()?,
            sharding,
        })
    }
}

/// Manifest of a legacy (single-resolution) mesh.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyManifest {
    pub fragments: Vec<String>,
}
