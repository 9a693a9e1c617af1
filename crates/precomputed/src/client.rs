//! HTTP client for fetching meshes from a precomputed store.
//!
//! A [`Client`] is one connection to one store: it reads the volume and mesh
//! `info` files on construction and then serves `fetch_mesh` calls for any
//! segment and level of detail.

use std::io::Read;
use std::ops::Range;
use std::sync::Arc;

use flate2::read::GzDecoder;
use precomputed_decode::{
    DracoFragments, FragmentDecoder, MeshBuffer, MultiLodManifest, decode_legacy_fragment,
    decode_minishard_index, decode_shard_index_entry, dequantize, find_chunk,
};
use serde::de::DeserializeOwned;

use crate::cache::{Cache, NoCache};
use crate::error::{Error, Result};
use crate::types::{
    DataEncoding, LegacyManifest, MeshInfo, MeshKind, MeshLayout, Sharding, VolumeInfo,
};
use crate::uri::StoreUri;

/// User agent sent with every request.
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A connection to a precomputed mesh store.
///
/// # Example
///
/// ```ignore
/// let client = Client::connect("precomputed://gs://iarpa_microns/minnie/minnie65/seg_m1300").await?;
/// let mesh = client.fetch_mesh(864691135975539779, 2).await?;
/// ```
pub struct Client<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: Arc<C>,
    store: StoreUri,
    mesh_dir: String,
    layout: MeshLayout,
    decoder: Arc<dyn FragmentDecoder>,
}

/// Build the default HTTP client.
pub fn default_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Http {
            url: String::new(),
            message: e.to_string(),
        })
}

impl Client<NoCache> {
    /// Connect to a store with a fresh HTTP client and no caching.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with(default_http_client()?, uri, NoCache).await
    }
}

impl<C: Cache> Client<C> {
    /// Connect to a store with a custom HTTP client and cache.
    ///
    /// Reads the volume `info` and the mesh directory's `info`. A mesh
    /// directory without an `info` file is treated as legacy.
    pub async fn connect_with(http: reqwest::Client, uri: &str, cache: C) -> Result<Self> {
        let store = StoreUri::parse(uri)?;
        let mut client = Self {
            http,
            cache: Arc::new(cache),
            store,
            mesh_dir: String::new(),
            layout: MeshLayout::legacy(),
            decoder: Arc::new(DracoFragments),
        };

        let volume: VolumeInfo = client
            .fetch_json(&client.store.join("info"), "volume info")
            .await?;
        client.mesh_dir = volume.mesh_dir().trim_matches('/').to_string();

        let mesh_info_url = client.mesh_url("info");
        let mesh_info = client
            .fetch_json::<MeshInfo>(&mesh_info_url, "mesh info")
            .await;
        match mesh_info {
            Ok(info) => client.layout = MeshLayout::from_info(&info)?,
            Err(e) if e.is_not_found() => {
                tracing::debug!(url = %mesh_info_url, "no mesh info, assuming legacy meshes");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            store = %client.store,
            mesh_dir = %client.mesh_dir,
            kind = ?client.layout.kind,
            sharded = client.layout.sharding.is_some(),
            "connected to mesh store"
        );

        Ok(client)
    }

    /// Replace the decoder used for multi-resolution fragments.
    ///
    /// Fragments are decoded as Draco unless replaced.
    #[must_use]
    pub fn with_fragment_decoder(mut self, decoder: impl FragmentDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// The store this connection reads from.
    #[must_use]
    pub fn store(&self) -> &StoreUri {
        &self.store
    }

    /// The mesh directory layout discovered on connect.
    #[must_use]
    pub fn layout(&self) -> &MeshLayout {
        &self.layout
    }

    /// Fetch the mesh of `segment` at level of detail `lod`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SegmentNotFound`] when the store has no mesh for the
    /// segment, [`Error::LodOutOfRange`] when the segment has fewer LODs, and
    /// transport or decode errors otherwise. No partial mesh is returned.
    pub async fn fetch_mesh(&self, segment: u64, lod: u32) -> Result<MeshBuffer> {
        let mesh = match (self.layout.kind, self.layout.sharding) {
            (MeshKind::Legacy, None) => self.fetch_legacy(segment, lod).await?,
            (MeshKind::Legacy, Some(sharding)) => {
                self.fetch_sharded_legacy(sharding, segment, lod).await?
            }
            (MeshKind::MultiLod, sharding) => self.fetch_multilod(sharding, segment, lod).await?,
        };

        tracing::debug!(
            segment,
            lod,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "fetched mesh"
        );
        Ok(mesh)
    }

    /// Legacy meshes: a JSON manifest per `segment:lod` listing fragment files.
    async fn fetch_legacy(&self, segment: u64, lod: u32) -> Result<MeshBuffer> {
        let manifest_url = self.mesh_url(&format!("{segment}:{lod}"));
        let manifest: LegacyManifest = self
            .fetch_json(&manifest_url, "legacy mesh manifest")
            .await
            .map_err(|e| not_found_as_segment(e, segment))?;

        let mut mesh = MeshBuffer::default();
        for fragment in &manifest.fragments {
            let data = self.fetch_bytes(&self.mesh_url(fragment), None).await?;
            mesh.append(decode_legacy_fragment(&data)?)?;
        }
        Ok(mesh)
    }

    /// Sharded legacy meshes: the chunk for a segment is one whole fragment.
    async fn fetch_sharded_legacy(
        &self,
        sharding: Sharding,
        segment: u64,
        lod: u32,
    ) -> Result<MeshBuffer> {
        if lod != 0 {
            return Err(Error::LodOutOfRange { lod, available: 1 });
        }
        let (shard_url, range) = self
            .locate_sharded_chunk(sharding, segment)
            .await?
            .ok_or(Error::SegmentNotFound { segment })?;
        let data = self.fetch_bytes(&shard_url, Some(range)).await?;
        let data = decode_encoding(data, sharding.data_encoding, "mesh chunk")?;
        Ok(decode_legacy_fragment(&data)?)
    }

    /// Multi-resolution meshes: a binary manifest followed by per-LOD fragments.
    async fn fetch_multilod(
        &self,
        sharding: Option<Sharding>,
        segment: u64,
        lod: u32,
    ) -> Result<MeshBuffer> {
        // Locate the manifest and the byte offset where fragment data starts.
        let (manifest, data_url, data_base) = if let Some(sharding) = sharding {
            let (shard_url, manifest_range) = self
                .locate_sharded_chunk(sharding, segment)
                .await?
                .ok_or(Error::SegmentNotFound { segment })?;
            let raw = self
                .fetch_bytes(&shard_url, Some(manifest_range.clone()))
                .await?;
            let raw = decode_encoding(raw, sharding.data_encoding, "mesh manifest")?;
            let manifest = MultiLodManifest::decode(&raw)?;

            // Fragment data sits immediately before the manifest in the shard.
            let base = manifest_range
                .start
                .checked_sub(manifest.total_fragment_bytes())
                .ok_or_else(|| Error::InvalidData {
                    context: "sharded mesh",
                    detail: format!(
                        "fragment data ({} bytes) does not fit before manifest at {}",
                        manifest.total_fragment_bytes(),
                        manifest_range.start
                    ),
                })?;
            (manifest, shard_url, base)
        } else {
            let raw = self
                .fetch_bytes(&self.mesh_url(&format!("{segment}.index")), None)
                .await
                .map_err(|e| not_found_as_segment(e, segment))?;
            let manifest = MultiLodManifest::decode(&raw)?;
            (manifest, self.mesh_url(&segment.to_string()), 0)
        };

        let lod_index = usize::try_from(lod).unwrap_or(usize::MAX);
        let (Some(fragments), Some(lod_range)) =
            (manifest.lod(lod_index), manifest.lod_byte_range(lod_index))
        else {
            return Err(Error::LodOutOfRange {
                lod,
                available: manifest.num_lods(),
            });
        };

        let mut mesh = MeshBuffer::default();
        if lod_range.is_empty() {
            return Ok(mesh);
        }

        let data = self
            .fetch_bytes(
                &data_url,
                Some(data_base + lod_range.start..data_base + lod_range.end),
            )
            .await?;

        for (position, bytes) in fragments
            .positions
            .iter()
            .zip(split_fragments(&data, &fragments.sizes)?)
        {
            if bytes.is_empty() {
                continue;
            }
            let mut fragment = self.decoder.decode(bytes)?;
            dequantize(
                &mut fragment,
                &manifest,
                lod_index,
                *position,
                self.layout.quantization_bits,
            )?;
            mesh.append(fragment)?;
        }

        mesh.transform(&self.layout.transform);
        Ok(mesh)
    }

    /// Find the shard file and byte range holding `segment`'s chunk.
    async fn locate_sharded_chunk(
        &self,
        sharding: Sharding,
        segment: u64,
    ) -> Result<Option<(String, Range<u64>)>> {
        let layout = sharding.layout;
        let location = layout.locate(segment);
        let shard_url = self.mesh_url(&layout.shard_file_name(location.shard));
        let index_size = layout.shard_index_size();

        tracing::debug!(
            segment,
            shard = location.shard,
            minishard = location.minishard,
            "locating sharded chunk"
        );

        let entry = self
            .fetch_bytes(&shard_url, Some(layout.shard_index_entry_range(location.minishard)))
            .await
            .map_err(|e| not_found_as_segment(e, segment))?;
        let minishard_range = decode_shard_index_entry(&entry, index_size)?;
        if minishard_range.is_empty() {
            return Ok(None);
        }

        let index = self.fetch_bytes(&shard_url, Some(minishard_range)).await?;
        let index = decode_encoding(index, sharding.minishard_index_encoding, "minishard index")?;
        let entries = decode_minishard_index(&index)?;

        let Some(chunk) = find_chunk(&entries, segment) else {
            return Ok(None);
        };
        Ok(Some((shard_url, chunk.byte_range(index_size)?)))
    }

    fn mesh_url(&self, name: &str) -> String {
        if self.mesh_dir.is_empty() {
            self.store.join(name)
        } else {
            self.store.join(&format!("{}/{name}", self.mesh_dir))
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str, context: &'static str) -> Result<T> {
        let data = self.fetch_bytes(url, None).await?;
        serde_json::from_slice(&data).map_err(|e| Error::Json {
            context,
            message: e.to_string(),
        })
    }

    /// Fetch raw bytes, optionally a byte range, using the cache if possible.
    async fn fetch_bytes(&self, url: &str, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let key = cache_key(url, range.as_ref());
        if let Some(data) = self.cache.get(&key).await? {
            tracing::debug!(url, "cache hit");
            return Ok(data);
        }

        tracing::debug!(url, ?range, "fetching");

        let mut request = self.http.get(url);
        if let Some(range) = &range {
            if range.is_empty() {
                return Ok(Vec::new());
            }
            request = request.header(reqwest::header::RANGE, range_header(range));
        }

        let response = request.send().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let partial = status == reqwest::StatusCode::PARTIAL_CONTENT;

        let body = response.bytes().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let data = match &range {
            // The server ignored the range and sent the whole object.
            Some(range) if !partial => slice_range(&body, range).ok_or_else(|| {
                Error::InvalidData {
                    context: "ranged response",
                    detail: format!(
                        "{url} is {} bytes, requested {}..{}",
                        body.len(),
                        range.start,
                        range.end
                    ),
                }
            })?,
            _ => body.to_vec(),
        };

        if let Some(range) = &range {
            let expected = range.end - range.start;
            if data.len() as u64 != expected {
                return Err(Error::InvalidData {
                    context: "ranged response",
                    detail: format!("{url}: expected {expected} bytes, got {}", data.len()),
                });
            }
        }

        self.cache.put(&key, data.clone()).await?;
        Ok(data)
    }
}

fn not_found_as_segment(error: Error, segment: u64) -> Error {
    if error.is_not_found() {
        Error::SegmentNotFound { segment }
    } else {
        error
    }
}

/// Cache key for a request: the URL, plus `#start-end` for ranged reads.
fn cache_key(url: &str, range: Option<&Range<u64>>) -> String {
    match range {
        Some(r) => format!("{url}#{}-{}", r.start, r.end),
        None => url.to_string(),
    }
}

/// HTTP `Range` header value; HTTP ranges are inclusive.
fn range_header(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}

fn slice_range(body: &[u8], range: &Range<u64>) -> Option<Vec<u8>> {
    let start = usize::try_from(range.start).ok()?;
    let end = usize::try_from(range.end).ok()?;
    body.get(start..end).map(<[u8]>::to_vec)
}

/// Split concatenated fragment data by the manifest's fragment sizes.
fn split_fragments<'a>(data: &'a [u8], sizes: &[u32]) -> Result<Vec<&'a [u8]>> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;
    for &size in sizes {
        let end = offset + size as usize;
        let bytes = data.get(offset..end).ok_or_else(|| Error::InvalidData {
            context: "fragment data",
            detail: format!("fragment ends at {end}, data is {} bytes", data.len()),
        })?;
        out.push(bytes);
        offset = end;
    }
    Ok(out)
}

fn decode_encoding(data: Vec<u8>, encoding: DataEncoding, context: &'static str) -> Result<Vec<u8>> {
    match encoding {
        DataEncoding::Raw => Ok(data),
        DataEncoding::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompress {
                    context,
                    message: e.to_string(),
                })?;
            Ok(out)
        }
    }
}
