//! Run configuration and command-line parsing.
//!
//! With no arguments the tool downloads the default neurons at the default
//! levels of detail. Command-line flags override individual settings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::export::{Exporter, MeshFormat, PlyEncoding};
use crate::session::{DEFAULT_DATASTACK, DEFAULT_SERVER, DEFAULT_VERSION, SessionConfig};

/// Neurons downloaded when no `--segment` is given.
pub const DEFAULT_SEGMENTS: [u64; 2] = [864_691_135_975_539_779, 864_691_135_801_604_706];
/// Levels of detail downloaded in batch mode when no `--lod` is given.
pub const DEFAULT_LODS: [u32; 3] = [1, 2, 3];
/// Level of detail of the single-mesh download.
pub const DEFAULT_SINGLE_LOD: u32 = 2;
/// Static mesh store of the MICrONs public release.
pub const DEFAULT_STORE: &str = "precomputed://gs://iarpa_microns/minnie/minnie65/seg_m1300";
pub const DEFAULT_OUTPUT_DIR: &str = "downloaded_neurons";
/// Per-connection cache size.
pub const DEFAULT_CACHE_MIB: usize = 64;

/// Everything a batch or single download needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Segment ids, processed in order.
    pub entity_ids: Vec<u64>,
    /// Levels of detail, processed in order for each segment.
    pub lods: Vec<u32>,
    pub store_uri: String,
    pub output_dir: PathBuf,
    /// Datastack session to open before downloading. `None` skips it.
    pub session: Option<SessionConfig>,
    pub formats: Vec<MeshFormat>,
    pub ply_encoding: PlyEncoding,
    /// Byte budget of each connection's cache.
    pub cache_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entity_ids: DEFAULT_SEGMENTS.to_vec(),
            lods: DEFAULT_LODS.to_vec(),
            store_uri: DEFAULT_STORE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            session: Some(SessionConfig::default()),
            formats: MeshFormat::ALL.to_vec(),
            ply_encoding: PlyEncoding::default(),
            cache_bytes: DEFAULT_CACHE_MIB << 20,
        }
    }
}

impl Config {
    /// The exporter for this run's output directory and formats.
    #[must_use]
    pub fn exporter(&self) -> Exporter {
        Exporter::new(self.output_dir.clone())
            .with_formats(&self.formats)
            .with_ply_encoding(self.ply_encoding)
    }
}

/// What to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every configured segment at every configured LOD.
    Batch,
    /// One segment at one LOD.
    Single { segment: u64, lod: u32 },
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub mode: Mode,
    pub config: Config,
}

#[derive(Parser)]
#[command(
    name = "neuron-fetch",
    about = "Download neuron meshes from a connectomics datastack and export them as OBJ/PLY",
    args_conflicts_with_subcommands = true
)]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    batch: BatchArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Download several segments at several levels of detail (the default).
    Batch(BatchArgs),
    /// Download one segment at one level of detail.
    Single(SingleArgs),
}

#[derive(Args)]
struct BatchArgs {
    /// Segment id to download. Repeatable.
    #[arg(long = "segment", value_name = "ID")]
    segments: Vec<u64>,

    /// Level of detail to download, 0 being finest. Repeatable.
    #[arg(long = "lod", value_name = "N")]
    lods: Vec<u32>,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Args)]
struct SingleArgs {
    /// Segment id to download.
    #[arg(long, value_name = "ID")]
    segment: u64,

    /// Level of detail to download, 0 being finest.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SINGLE_LOD)]
    lod: u32,

    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Args)]
struct SharedArgs {
    /// Mesh store to read from.
    #[arg(long, value_name = "URI", default_value = DEFAULT_STORE)]
    store: String,

    /// Directory the mesh files are written to.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Output format. Repeatable; both formats when omitted.
    #[arg(long = "format", value_enum, value_name = "FORMAT")]
    formats: Vec<MeshFormat>,

    /// Encoding of PLY files.
    #[arg(long, value_enum, default_value_t = PlyEncoding::Binary)]
    ply_encoding: PlyEncoding,

    /// CAVE datastack to open a session against.
    #[arg(long, default_value = DEFAULT_DATASTACK)]
    datastack: String,

    /// Materialization version to pin.
    #[arg(long, default_value_t = DEFAULT_VERSION)]
    version: u64,

    /// CAVE info server.
    #[arg(long, value_name = "URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// CAVE token. Read from ~/.cloudvolume/secrets when omitted.
    #[arg(long)]
    token: Option<String>,

    /// Skip the datastack session.
    #[arg(long)]
    no_session: bool,

    /// Cache size per store connection, in MiB.
    #[arg(long, value_name = "MIB", default_value_t = DEFAULT_CACHE_MIB)]
    cache_mib: usize,
}

impl SharedArgs {
    fn into_config(self, entity_ids: Vec<u64>, lods: Vec<u32>) -> Config {
        let session = (!self.no_session).then(|| SessionConfig {
            server: self.server,
            datastack: self.datastack,
            version: self.version,
            token: self.token,
            secrets_dir: None,
        });
        let formats = if self.formats.is_empty() {
            MeshFormat::ALL.to_vec()
        } else {
            self.formats
        };

        Config {
            entity_ids,
            lods,
            store_uri: self.store,
            output_dir: self.output_dir,
            session,
            formats,
            ply_encoding: self.ply_encoding,
            cache_bytes: self.cache_mib.saturating_mul(1 << 20),
        }
    }
}

impl BatchArgs {
    fn into_invocation(self) -> Invocation {
        let entity_ids = if self.segments.is_empty() {
            DEFAULT_SEGMENTS.to_vec()
        } else {
            self.segments
        };
        let lods = if self.lods.is_empty() {
            DEFAULT_LODS.to_vec()
        } else {
            self.lods
        };
        Invocation {
            mode: Mode::Batch,
            config: self.shared.into_config(entity_ids, lods),
        }
    }
}

impl CliArgs {
    fn into_invocation(self) -> Invocation {
        match self.command {
            None => self.batch.into_invocation(),
            Some(Command::Batch(batch)) => batch.into_invocation(),
            Some(Command::Single(single)) => Invocation {
                mode: Mode::Single {
                    segment: single.segment,
                    lod: single.lod,
                },
                config: single
                    .shared
                    .into_config(vec![single.segment], vec![single.lod]),
            },
        }
    }
}

/// Parse the process arguments, exiting with a usage message on error.
#[must_use]
pub fn parse() -> Invocation {
    CliArgs::parse().into_invocation()
}

/// Parse an explicit argument list.
pub fn parse_from<I, T>(args: I) -> Result<Invocation, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    CliArgs::try_parse_from(args).map(CliArgs::into_invocation)
}
