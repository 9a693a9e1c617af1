//! Error types for the precomputed crate.

use std::fmt;

/// Result type for precomputed operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching meshes from a precomputed store.
#[derive(Debug)]
pub enum Error {
    /// The store URI could not be understood.
    InvalidUri {
        /// The URI as given.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The store has no mesh for this segment.
    SegmentNotFound {
        /// The requested segment id.
        segment: u64,
    },
    /// The requested level of detail does not exist for this segment.
    LodOutOfRange {
        /// The requested LOD.
        lod: u32,
        /// Number of LODs the segment has.
        available: usize,
    },
    /// JSON decoding failed.
    Json {
        /// Context for where the error occurred.
        context: &'static str,
        /// The error message.
        message: String,
    },
    /// Gzip decompression failed.
    Decompress {
        /// Context for where the error occurred.
        context: &'static str,
        /// The error message.
        message: String,
    },
    /// Binary mesh decoding failed.
    Decode(precomputed_decode::DecodeError),
    /// Cache operation failed.
    Cache {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
    /// Invalid data in response.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
}

impl Error {
    /// True when the remote store answered "not found" for the request.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SegmentNotFound { .. } | Error::HttpStatus { status: 404, .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUri { uri, reason } => {
                write!(f, "invalid store uri {uri:?}: {reason}")
            }
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::SegmentNotFound { segment } => {
                write!(f, "no mesh found for segment {segment}")
            }
            Error::LodOutOfRange { lod, available } => {
                write!(f, "lod {lod} out of range: segment has {available} lods")
            }
            Error::Json { context, message } => {
                write!(f, "failed to parse {context}: {message}")
            }
            Error::Decompress { context, message } => {
                write!(f, "failed to decompress {context}: {message}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Cache { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<precomputed_decode::DecodeError> for Error {
    fn from(e: precomputed_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}
