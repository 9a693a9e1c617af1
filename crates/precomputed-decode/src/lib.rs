//! Decode Neuroglancer precomputed mesh data.
//!
//! This crate provides pure synchronous decoding functions for the binary
//! pieces of a precomputed segmentation's mesh directory: multi-resolution
//! manifests, legacy and Draco fragments, and the sharded key layout. It performs no
//! I/O; the caller fetches bytes and controls parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Bounds-checked**: Truncated or oversized inputs return errors, never panic

mod bytes;
mod draco;
mod error;
pub mod fragment;
mod hash;
mod legacy;
pub mod manifest;
mod mesh;
pub mod sharding;

pub use error::{DecodeError, DecodeResult};
pub use draco::DracoFragments;
pub use fragment::{FragmentDecoder, dequantize};
pub use hash::{murmurhash3_key, murmurhash3_x86_128};
pub use legacy::decode_legacy_fragment;
pub use manifest::{LodFragments, MultiLodManifest};
pub use mesh::MeshBuffer;
pub use sharding::{
    HashFunction, MinishardEntry, ShardLayout, ShardLocation, decode_minishard_index,
    decode_shard_index_entry, find_chunk,
};

// Re-export glam types used in the public API.
pub use glam::{UVec3, Vec3};
