//! Authenticated session against a CAVE datastack info service.
//!
//! The session resolves a datastack's metadata and checks that the requested
//! materialization version exists. Mesh fetching does not go through it; it
//! runs first so that a misconfigured datastack fails fast.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Global CAVE info server.
pub const DEFAULT_SERVER: &str = "https://global.daf-apis.com";
/// Public MICrONs datastack.
pub const DEFAULT_DATASTACK: &str = "minnie65_public";
/// Materialization version the default store was meshed at.
pub const DEFAULT_VERSION: u64 = 1300;

/// Where and how to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the info service.
    pub server: String,
    pub datastack: String,
    /// Materialization version to pin.
    pub version: u64,
    /// Explicit token. When absent, the CAVE secret files are consulted.
    pub token: Option<String>,
    /// Directory holding CAVE secret files. Defaults to
    /// `~/.cloudvolume/secrets`.
    pub secrets_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            datastack: DEFAULT_DATASTACK.to_string(),
            version: DEFAULT_VERSION,
            token: None,
            secrets_dir: None,
        }
    }
}

#[derive(Deserialize)]
struct SecretFile {
    token: String,
}

impl SessionConfig {
    /// The token to authenticate with, if any.
    ///
    /// Order: the explicit token, then `<host>-cave-secret.json`, then
    /// `cave-secret.json` in the secrets directory. Missing files are skipped;
    /// unreadable or malformed ones are errors.
    pub fn resolve_token(&self) -> Result<Option<String>, SessionError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        let Some(dir) = self.secrets_dir.clone().or_else(default_secrets_dir) else {
            return Ok(None);
        };

        let mut candidates = Vec::with_capacity(2);
        if let Some(host) = server_host(&self.server) {
            candidates.push(dir.join(format!("{host}-cave-secret.json")));
        }
        candidates.push(dir.join("cave-secret.json"));

        for path in candidates {
            match read_secret(&path) {
                Ok(token) => {
                    tracing::debug!(path = %path.display(), "using CAVE secret file");
                    return Ok(Some(token));
                }
                Err(SessionError::Secret { source: SecretSource::Io(e), .. })
                    if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

fn read_secret(path: &Path) -> Result<String, SessionError> {
    let secret_error = |source| SessionError::Secret {
        path: path.to_path_buf(),
        source,
    };
    let text = fs::read_to_string(path).map_err(|e| secret_error(SecretSource::Io(e)))?;
    let secret: SecretFile = serde_json::from_str(&text)
        .map_err(|e| secret_error(SecretSource::Parse(e.to_string())))?;
    Ok(secret.token)
}

fn default_secrets_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".cloudvolume").join("secrets"))
}

fn server_host(server: &str) -> Option<String> {
    reqwest::Url::parse(server)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

/// Datastack metadata from the info service. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatastackInfo {
    pub aligned_volume: Option<AlignedVolume>,
    /// Segmentation source, e.g. `graphene://https://…` or `precomputed://…`.
    pub segmentation_source: Option<String>,
    /// Server hosting the materialization service.
    pub local_server: Option<String>,
    /// Voxel size in nanometers, per axis.
    pub viewer_resolution_x: Option<f64>,
    pub viewer_resolution_y: Option<f64>,
    pub viewer_resolution_z: Option<f64>,
}

impl DatastackInfo {
    /// Voxel size in nanometers, if all three axes are given.
    #[must_use]
    pub fn viewer_resolution(&self) -> Option<[f64; 3]> {
        Some([
            self.viewer_resolution_x?,
            self.viewer_resolution_y?,
            self.viewer_resolution_z?,
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlignedVolume {
    pub name: String,
}

/// Why a secret file could not be used.
#[derive(Debug)]
pub enum SecretSource {
    Io(io::Error),
    Parse(String),
}

/// Errors from opening a session.
#[derive(Debug)]
pub enum SessionError {
    /// A CAVE secret file exists but could not be read or parsed.
    Secret { path: PathBuf, source: SecretSource },
    /// The request could not be sent or its body not received.
    Http { url: String, message: String },
    /// The service answered with a non-success status.
    HttpStatus { url: String, status: u16 },
    /// The response body was not the expected JSON.
    Json { url: String, message: String },
    /// The datastack does not list the requested version.
    UnknownVersion {
        datastack: String,
        version: u64,
        latest: Option<u64>,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret { path, source } => match source {
                SecretSource::Io(e) => write!(f, "failed to read {}: {e}", path.display()),
                SecretSource::Parse(message) => {
                    write!(f, "invalid secret file {}: {message}", path.display())
                }
            },
            Self::Http { url, message } => write!(f, "request to {url} failed: {message}"),
            Self::HttpStatus { url, status } => write!(f, "HTTP {status} from {url}"),
            Self::Json { url, message } => write!(f, "invalid response from {url}: {message}"),
            Self::UnknownVersion {
                datastack,
                version,
                latest,
            } => {
                write!(f, "datastack {datastack} has no version {version}")?;
                if let Some(latest) = latest {
                    write!(f, " (latest is {latest})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Secret {
                source: SecretSource::Io(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

/// An open session pinned to one materialization version.
#[derive(Debug, Clone)]
pub struct AuthSession {
    datastack: String,
    version: u64,
    authenticated: bool,
    info: DatastackInfo,
}

impl AuthSession {
    /// Look up the datastack and pin the configured version.
    ///
    /// # Errors
    ///
    /// Fails if a secret file is malformed, a request fails, or the version
    /// is not listed for the datastack.
    pub async fn connect(
        http: &reqwest::Client,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let token = config.resolve_token()?;
        let server = config.server.trim_end_matches('/');

        let info_url = format!("{server}/info/api/v2/datastack/full/{}", config.datastack);
        let info: DatastackInfo = get_json(http, &info_url, token.as_deref()).await?;

        let local_server = info
            .local_server
            .as_deref()
            .unwrap_or(server)
            .trim_end_matches('/');
        let versions_url = format!(
            "{local_server}/materialize/api/v2/datastack/{}/versions?expired=true",
            config.datastack
        );
        let versions: Vec<u64> = get_json(http, &versions_url, token.as_deref()).await?;
        if !versions.contains(&config.version) {
            return Err(SessionError::UnknownVersion {
                datastack: config.datastack.clone(),
                version: config.version,
                latest: versions.iter().max().copied(),
            });
        }

        let session = Self {
            datastack: config.datastack.clone(),
            version: config.version,
            authenticated: token.is_some(),
            info,
        };
        tracing::info!(
            datastack = %session.datastack,
            version = session.version,
            authenticated = session.authenticated,
            aligned_volume = session.aligned_volume().unwrap_or("unknown"),
            resolution_nm = ?session.viewer_resolution(),
            segmentation = session.segmentation_source().unwrap_or("unknown"),
            "datastack session ready"
        );
        Ok(session)
    }

    #[must_use]
    pub fn datastack(&self) -> &str {
        &self.datastack
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether a token was sent.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub fn aligned_volume(&self) -> Option<&str> {
        self.info.aligned_volume.as_ref().map(|v| v.name.as_str())
    }

    #[must_use]
    pub fn viewer_resolution(&self) -> Option<[f64; 3]> {
        self.info.viewer_resolution()
    }

    #[must_use]
    pub fn segmentation_source(&self) -> Option<&str> {
        self.info.segmentation_source.as_deref()
    }
}

async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> Result<T, SessionError> {
    tracing::debug!(url, "fetching");

    let mut request = http.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(|e| SessionError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SessionError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.json().await.map_err(|e| SessionError::Json {
        url: url.to_string(),
        message: e.to_string(),
    })
}
