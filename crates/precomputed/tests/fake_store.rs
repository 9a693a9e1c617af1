//! End-to-end tests against an in-process HTTP store.
//!
//! The server understands just enough HTTP/1.1 for reqwest: one request per
//! connection, optional `Range: bytes=a-b`, `Connection: close` responses.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use draco_oxide::encode::{self, AttributeConfig, Config, Quantization};
use draco_oxide::{AttributeDomain, AttributeType, ConfigType, MeshBuilder, NdVector};
use flate2::{Compression, write::GzEncoder};
use precomputed::{Client, DecodeError, Error, MemoryCache, MeshKind, default_http_client};
use precomputed_decode::Vec3;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Objects = HashMap<String, Vec<u8>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn serve(objects: Objects) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let objects = Arc::new(objects);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let objects = Arc::clone(&objects);
            tokio::spawn(async move {
                let _ = respond(socket, &objects).await;
            });
        }
    });
    format!("http://{addr}")
}

async fn respond(mut socket: TcpStream, objects: &Objects) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&request);
    let mut lines = head.lines();
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .trim_start_matches('/')
        .to_string();
    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("range")
            .then(|| parse_range(value.trim()))
            .flatten()
    });

    let (status, body) = match objects.get(&path) {
        None => ("404 Not Found", Vec::new()),
        Some(body) => match range {
            Some((start, end)) => {
                let end = end.min(body.len().saturating_sub(1));
                ("206 Partial Content", body[start..=end].to_vec())
            }
            None => ("200 OK", body.clone()),
        },
    };

    let mut response = format!(
        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    socket.write_all(&response).await?;
    socket.shutdown().await
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Legacy fragment bytes: vertex count, positions, then triangle indices.
fn legacy_fragment(vertices: &[[f32; 3]], faces: &[[u32; 3]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&u32::try_from(vertices.len()).unwrap().to_le_bytes());
    for v in vertices.iter().flatten() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for i in faces.iter().flatten() {
        out.extend_from_slice(&i.to_le_bytes());
    }
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

const TRIANGLE: [[u32; 3]; 1] = [[0, 1, 2]];

/// A Draco tetrahedron with corners at 0 and 3 on each axis, quantized to
/// 2 bits so that 3 is the far side of its grid cell.
fn draco_tetrahedron() -> Vec<u8> {
    let corners: [[f32; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [3.0, 0.0, 0.0],
        [0.0, 3.0, 0.0],
        [0.0, 0.0, 3.0],
    ];
    let mut builder = MeshBuilder::new();
    builder.set_connectivity_attribute(vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]);
    builder.add_attribute(
        corners.map(NdVector::from).to_vec(),
        AttributeType::Position,
        AttributeDomain::Position,
        Vec::new(),
    );
    let config = <Config as ConfigType>::default().with_attribute(
        AttributeType::Position,
        AttributeConfig {
            quantization: Some(Quantization::Bits(2)),
            ..AttributeConfig::default()
        },
    );
    let mut out = Vec::new();
    encode::encode_mesh(builder.build().unwrap(), &mut out, config).unwrap();
    out
}

/// Vertex positions rounded and sorted, since Draco reorders vertices.
fn sorted_positions(vertices: &[Vec3]) -> Vec<[i32; 3]> {
    let mut out: Vec<[i32; 3]> = vertices
        .iter()
        .map(|v| v.round().as_ivec3().to_array())
        .collect();
    out.sort_unstable();
    out
}

#[tokio::test]
async fn test_legacy_store() {
    init_tracing();
    let tri_a = legacy_fragment(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], &TRIANGLE);
    let tri_b = legacy_fragment(&[[5.0, 5.0, 5.0], [6.0, 5.0, 5.0], [5.0, 6.0, 5.0]], &TRIANGLE);

    let objects = Objects::from([
        (
            "seg/info".to_string(),
            br#"{"type": "segmentation", "mesh": "mesh_legacy"}"#.to_vec(),
        ),
        (
            "seg/mesh_legacy/42:1".to_string(),
            br#"{"fragments": ["42:1:a", "42:1:b"]}"#.to_vec(),
        ),
        ("seg/mesh_legacy/42:1:a".to_string(), tri_a),
        ("seg/mesh_legacy/42:1:b".to_string(), tri_b),
    ]);
    let base = serve(objects).await;

    let client = Client::connect(&format!("precomputed://{base}/seg"))
        .await
        .unwrap();
    assert_eq!(client.layout().kind, MeshKind::Legacy);
    assert!(client.layout().sharding.is_none());

    let mesh = client.fetch_mesh(42, 1).await.unwrap();
    assert_eq!(mesh.vertex_count(), 6);
    assert_eq!(mesh.faces, vec![[0, 1, 2], [3, 4, 5]]);
    assert_eq!(mesh.vertices[3], Vec3::new(5.0, 5.0, 5.0));

    assert!(matches!(
        client.fetch_mesh(43, 1).await,
        Err(Error::SegmentNotFound { segment: 43 })
    ));
}

#[tokio::test]
async fn test_missing_volume_info() {
    let base = serve(Objects::new()).await;
    let result = Client::connect(&format!("{base}/nothing")).await;
    assert!(matches!(
        result,
        Err(Error::HttpStatus { status: 404, .. })
    ));
}

fn put_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Multi-resolution manifest bytes, one `(position, size)` list per LOD.
fn manifest(chunk_shape: f32, lods: &[Vec<([u32; 3], u32)>]) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..3 {
        put_f32(&mut out, chunk_shape);
    }
    for _ in 0..3 {
        put_f32(&mut out, 0.0);
    }
    let num_lods = u32::try_from(lods.len()).unwrap();
    out.extend_from_slice(&num_lods.to_le_bytes());
    for lod in 0..num_lods {
        put_f32(&mut out, 2f32.powi(i32::try_from(lod).unwrap()));
    }
    for _ in 0..lods.len() * 3 {
        put_f32(&mut out, 0.0);
    }
    for fragments in lods {
        let n = u32::try_from(fragments.len()).unwrap();
        out.extend_from_slice(&n.to_le_bytes());
    }
    for fragments in lods {
        for axis in 0..3 {
            for (position, _) in fragments {
                out.extend_from_slice(&position[axis].to_le_bytes());
            }
        }
        for (_, size) in fragments {
            out.extend_from_slice(&size.to_le_bytes());
        }
    }
    out
}

fn u64_le(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A sharded multi-resolution store holding segment 6.
///
/// Identity hash, one minishard bit, one shard bit: segment 6 (`0b110`) lives
/// in minishard 0 of shard 1.
fn sharded_store() -> Objects {
    let fragment = draco_tetrahedron();
    let size = u32::try_from(fragment.len()).unwrap();

    let lods = vec![
        vec![([0, 0, 0], size)],
        vec![([0, 0, 0], size), ([0, 1, 0], 0), ([1, 0, 0], size)],
    ];
    let manifest = manifest(8.0, &lods);

    // Data region: lod 0 fragment, lod 1 fragments, manifest, minishard index.
    let mut data = Vec::new();
    data.extend_from_slice(&fragment);
    data.extend_from_slice(&fragment);
    data.extend_from_slice(&fragment);
    let manifest_offset = data.len() as u64;
    data.extend_from_slice(&manifest);

    let minishard_index = gzip(&u64_le(&[6, manifest_offset, manifest.len() as u64]));
    let minishard_start = data.len() as u64;
    data.extend_from_slice(&minishard_index);
    let minishard_end = data.len() as u64;

    let mut shard = u64_le(&[minishard_start, minishard_end, 0, 0]);
    shard.extend_from_slice(&data);

    let mesh_info = r#"{
        "@type": "neuroglancer_multilod_draco",
        "vertex_quantization_bits": 2,
        "transform": [2, 0, 0, 100, 0, 2, 0, 0, 0, 0, 2, 0],
        "lod_scale_multiplier": 1.0,
        "sharding": {
            "@type": "neuroglancer_uint64_sharded_v1",
            "preshift_bits": 0,
            "hash": "identity",
            "minishard_bits": 1,
            "shard_bits": 1,
            "minishard_index_encoding": "gzip",
            "data_encoding": "raw"
        }
    }"#;

    Objects::from([
        (
            "seg/info".to_string(),
            br#"{"type": "segmentation", "mesh": "mesh"}"#.to_vec(),
        ),
        ("seg/mesh/info".to_string(), mesh_info.as_bytes().to_vec()),
        ("seg/mesh/1.shard".to_string(), shard),
    ])
}

#[tokio::test]
async fn test_sharded_multilod_store() {
    init_tracing();
    let base = serve(sharded_store()).await;
    let client = Client::connect_with(
        default_http_client().unwrap(),
        &format!("precomputed://{base}/seg"),
        MemoryCache::with_max_size(1 << 20),
    )
    .await
    .unwrap();

    assert_eq!(client.layout().kind, MeshKind::MultiLod);
    assert_eq!(client.layout().quantization_bits, 2);

    // LOD 0: one cell of 8 units, then x' = 2x + 100.
    let lod0 = client.fetch_mesh(6, 0).await.unwrap();
    assert_eq!(lod0.face_count(), 4);
    assert_eq!(
        sorted_positions(&lod0.vertices),
        vec![[100, 0, 0], [100, 0, 16], [100, 16, 0], [116, 0, 0]]
    );

    // LOD 1: cells of 16 units, the empty fragment is skipped.
    let lod1 = client.fetch_mesh(6, 1).await.unwrap();
    assert_eq!(lod1.vertex_count(), 8);
    assert_eq!(lod1.face_count(), 8);
    assert!(lod1.faces.iter().flatten().all(|&i| i < 8));
    assert!(lod1.faces[..4].iter().flatten().all(|&i| i < 4));
    assert!(lod1.faces[4..].iter().flatten().all(|&i| i >= 4));
    assert_eq!(
        sorted_positions(&lod1.vertices),
        vec![
            [100, 0, 0],
            [100, 0, 32],
            [100, 32, 0],
            [132, 0, 0],
            [132, 0, 0],
            [132, 0, 32],
            [132, 32, 0],
            [164, 0, 0],
        ]
    );

    assert!(matches!(
        client.fetch_mesh(6, 2).await,
        Err(Error::LodOutOfRange {
            lod: 2,
            available: 2
        })
    ));
}

#[tokio::test]
async fn test_sharded_missing_segments() {
    let base = serve(sharded_store()).await;
    let client = Client::connect(&format!("{base}/seg")).await.unwrap();

    // Shard 0 does not exist.
    assert!(matches!(
        client.fetch_mesh(4, 0).await,
        Err(Error::SegmentNotFound { segment: 4 })
    ));
    // Minishard 1 of shard 1 is empty.
    assert!(matches!(
        client.fetch_mesh(7, 0).await,
        Err(Error::SegmentNotFound { segment: 7 })
    ));
    // Minishard 0 of shard 1 only holds segment 6.
    assert!(matches!(
        client.fetch_mesh(2, 0).await,
        Err(Error::SegmentNotFound { segment: 2 })
    ));
}

#[tokio::test]
async fn test_corrupt_draco_fragment() {
    let mut objects = sharded_store();
    let shard = objects.get_mut("seg/mesh/1.shard").unwrap();
    // The first fragment starts right after the 32-byte shard index.
    shard[32..40].copy_from_slice(b"garbage!");
    let base = serve(objects).await;
    let client = Client::connect(&format!("{base}/seg")).await.unwrap();

    assert!(matches!(
        client.fetch_mesh(6, 0).await,
        Err(Error::Decode(DecodeError::Malformed {
            context: "draco fragment",
            ..
        }))
    ));
}

#[tokio::test]
async fn test_legacy_fragment_with_missing_vertex() {
    let objects = Objects::from([
        (
            "seg/info".to_string(),
            br#"{"type": "segmentation", "mesh": "mesh"}"#.to_vec(),
        ),
        (
            "seg/mesh/9:0".to_string(),
            br#"{"fragments": ["9:0:a"]}"#.to_vec(),
        ),
        (
            "seg/mesh/9:0:a".to_string(),
            legacy_fragment(&[[0.0, 0.0, 0.0]], &[[u32::MAX, 0, 0]]),
        ),
    ]);
    let base = serve(objects).await;
    let client = Client::connect(&format!("{base}/seg")).await.unwrap();

    assert!(matches!(
        client.fetch_mesh(9, 0).await,
        Err(Error::Decode(DecodeError::Malformed { .. }))
    ));
}
