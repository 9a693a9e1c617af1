//! The download pipeline: connect, fetch, export.
//!
//! Segments are processed in order, one store connection per segment, and
//! each segment's levels of detail in order on that connection. A failure in
//! one `(segment, lod)` unit is logged and recorded in the [`BatchReport`];
//! the run moves on to the next unit.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use precomputed::{Cache, Client, MemoryCache, MeshBuffer};

use crate::config::Config;
use crate::export::{ExportError, Exporter};

/// Future type for [`Connector::connect`].
pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = precomputed::Result<Box<dyn MeshSource>>> + Send + 'a>>;

/// Future type for [`MeshSource::fetch_mesh`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = precomputed::Result<MeshBuffer>> + Send + 'a>>;

/// An open connection to a mesh store.
pub trait MeshSource: Send + Sync {
    /// Fetch the mesh of `segment` at `lod`.
    fn fetch_mesh(&self, segment: u64, lod: u32) -> FetchFuture<'_>;
}

/// Opens connections to mesh stores.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, store_uri: &'a str) -> ConnectFuture<'a>;
}

impl<C: Cache + 'static> MeshSource for Client<C> {
    fn fetch_mesh(&self, segment: u64, lod: u32) -> FetchFuture<'_> {
        Box::pin(Client::fetch_mesh(self, segment, lod))
    }
}

/// Connects over HTTP, giving each connection its own bounded cache.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    cache_bytes: usize,
}

impl HttpConnector {
    #[must_use]
    pub fn new(http: reqwest::Client, cache_bytes: usize) -> Self {
        Self { http, cache_bytes }
    }
}

impl Connector for HttpConnector {
    fn connect<'a>(&'a self, store_uri: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let client = Client::connect_with(
                self.http.clone(),
                store_uri,
                MemoryCache::with_max_size(self.cache_bytes),
            )
            .await?;
            Ok(Box::new(client) as Box<dyn MeshSource>)
        })
    }
}

/// The pipeline stage a unit failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Fetch,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Fetch => "fetch",
            Self::Export => "export",
        })
    }
}

/// A unit that was fetched and exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSuccess {
    pub vertex_count: usize,
    pub face_count: usize,
    /// Files written, in export order.
    pub files: Vec<PathBuf>,
}

/// A unit that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub stage: Stage,
    pub reason: String,
}

/// Result of one `(segment, lod)` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub segment: u64,
    pub lod: u32,
    pub result: Result<UnitSuccess, UnitFailure>,
}

/// Every unit of a batch, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    #[must_use]
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    /// Total number of files written.
    #[must_use]
    pub fn files_written(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|s| s.files.len())
            .sum()
    }

    /// Paths of every written file, in order.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flat_map(|s| s.files.iter())
    }
}

/// Download every configured segment at every configured LOD.
///
/// # Errors
///
/// Only failing to create the output directory aborts the batch. Connection,
/// fetch and export failures are recorded per unit.
pub async fn run_batch<C>(connector: &C, config: &Config) -> Result<BatchReport, ExportError>
where
    C: Connector + ?Sized,
{
    let exporter = config.exporter();
    exporter.prepare()?;

    tracing::info!(
        segments = config.entity_ids.len(),
        lods = ?config.lods,
        store = %config.store_uri,
        output_dir = %exporter.output_dir().display(),
        "starting neuron mesh download"
    );

    let mut report = BatchReport::default();
    let total = config.entity_ids.len();

    for (i, &segment) in config.entity_ids.iter().enumerate() {
        tracing::info!(segment, "[{}/{total}] processing neuron", i + 1);

        let source = match connector.connect(&config.store_uri).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(segment, error = %e, "failed to open mesh store");
                let reason = e.to_string();
                report.outcomes.extend(config.lods.iter().map(|&lod| UnitOutcome {
                    segment,
                    lod,
                    result: Err(UnitFailure {
                        stage: Stage::Connect,
                        reason: reason.clone(),
                    }),
                }));
                continue;
            }
        };

        for &lod in &config.lods {
            let result = fetch_and_export(source.as_ref(), &exporter, segment, lod).await;
            match &result {
                Ok(success) => tracing::info!(
                    segment,
                    lod,
                    vertices = success.vertex_count,
                    faces = success.face_count,
                    "saved mesh"
                ),
                Err(failure) => tracing::warn!(
                    segment,
                    lod,
                    stage = %failure.stage,
                    error = %failure.reason,
                    "skipping mesh"
                ),
            }
            report.outcomes.push(UnitOutcome {
                segment,
                lod,
                result,
            });
        }
    }

    log_summary(&report, &exporter);
    Ok(report)
}

async fn fetch_and_export(
    source: &dyn MeshSource,
    exporter: &Exporter,
    segment: u64,
    lod: u32,
) -> Result<UnitSuccess, UnitFailure> {
    let mesh = source
        .fetch_mesh(segment, lod)
        .await
        .map_err(|e| UnitFailure {
            stage: Stage::Fetch,
            reason: e.to_string(),
        })?;
    let files = exporter
        .export(segment, lod, &mesh)
        .map_err(|e| UnitFailure {
            stage: Stage::Export,
            reason: e.to_string(),
        })?;
    Ok(UnitSuccess {
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        files,
    })
}

/// Download one segment at one LOD over a fresh connection.
///
/// Returns `Ok(None)` when the store cannot be opened or the mesh cannot be
/// fetched; both are logged.
///
/// # Errors
///
/// Fails if the output directory cannot be created or a file cannot be
/// written.
pub async fn download_single<C>(
    connector: &C,
    config: &Config,
    segment: u64,
    lod: u32,
) -> Result<Option<UnitSuccess>, ExportError>
where
    C: Connector + ?Sized,
{
    let exporter = config.exporter();
    exporter.prepare()?;

    tracing::info!(segment, lod, "downloading mesh");

    let source = match connector.connect(&config.store_uri).await {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(segment, lod, error = %e, "failed to open mesh store");
            return Ok(None);
        }
    };
    let mesh = match source.fetch_mesh(segment, lod).await {
        Ok(mesh) => mesh,
        Err(e) => {
            tracing::warn!(segment, lod, error = %e, "failed to fetch mesh");
            return Ok(None);
        }
    };

    let files = exporter.export(segment, lod, &mesh)?;
    for path in &files {
        tracing::info!(path = %path.display(), "saved");
    }
    tracing::info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "mesh stats"
    );

    Ok(Some(UnitSuccess {
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        files,
    }))
}

fn log_summary(report: &BatchReport, exporter: &Exporter) {
    tracing::info!(
        succeeded = report.successes(),
        failed = report.failures(),
        files = report.files_written(),
        output_dir = %exporter.output_dir().display(),
        "download complete"
    );
    for outcome in &report.outcomes {
        if let Err(failure) = &outcome.result {
            tracing::info!(
                segment = outcome.segment,
                lod = outcome.lod,
                stage = %failure.stage,
                "not downloaded"
            );
        }
    }
    if report.files_written() > 0 {
        tracing::info!("to view in Blender: File > Import > Wavefront (.obj) or Stanford (.ply)");
        tracing::info!("meshes are in nanometers; scale by 0.001 on import for micrometers");
    }
}
