//! Async client for fetching meshes from Neuroglancer precomputed volumes.
//!
//! This crate opens a connection to a precomputed segmentation over HTTPS
//! (`gs://` and `s3://` buckets are mapped to their public endpoints), reads
//! the mesh directory's metadata, and fetches a segment's mesh at a chosen
//! level of detail as a [`MeshBuffer`].
//!
//! # Design principles
//!
//! - **Runtime-agnostic**: Returns `impl Future`, works with any executor
//!   that can drive reqwest
//! - **Sync decoding**: Binary decoding lives in `precomputed-decode`
//! - **One connection, one cache**: Cached bytes never outlive a [`Client`]
//!
//! # Example
//!
//! ```ignore
//! use precomputed::{Client, MemoryCache, default_http_client};
//!
//! let client = Client::connect_with(
//!     default_http_client()?,
//!     "precomputed://gs://iarpa_microns/minnie/minnie65/seg_m1300",
//!     MemoryCache::with_max_size(64 << 20),
//! )
//! .await?;
//! let mesh = client.fetch_mesh(864691135975539779, 2).await?;
//! ```

pub mod cache;
mod client;
mod error;
pub mod types;
mod uri;

pub use cache::{Cache, MemoryCache, NoCache};
pub use client::{Client, default_http_client};
pub use error::{Error, Result};
pub use types::{MeshKind, MeshLayout};
pub use uri::StoreUri;

// Re-export decode types for convenience.
pub use precomputed_decode::{DecodeError, DracoFragments, FragmentDecoder, MeshBuffer};
