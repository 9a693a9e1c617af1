//! Download neuron meshes from a connectomics datastack.
//!
//! The pipeline opens an optional [`session::AuthSession`] against a CAVE
//! datastack, then for each segment connects to a precomputed mesh store,
//! fetches the mesh at each requested level of detail, and writes it as OBJ
//! and PLY files.
//!
//! # Example
//!
//! ```ignore
//! use neuron_fetch::{Config, HttpConnector, run_batch};
//!
//! let config = Config::default();
//! let connector = HttpConnector::new(precomputed::default_http_client()?, config.cache_bytes);
//! let report = run_batch(&connector, &config).await?;
//! println!("{} files written", report.files_written());
//! ```

pub mod config;
pub mod export;
pub mod pipeline;
pub mod session;

pub use config::{Config, Invocation, Mode};
pub use export::{ExportError, Exporter, MeshFormat, PlyEncoding, artifact_path};
pub use pipeline::{
    BatchReport, Connector, HttpConnector, MeshSource, Stage, UnitFailure, UnitOutcome,
    UnitSuccess, download_single, run_batch,
};
pub use session::{AuthSession, SessionConfig, SessionError};
