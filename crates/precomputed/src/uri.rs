//! Store URI parsing.
//!
//! Stores are named the way Neuroglancer and `CloudVolume` name them, e.g.
//! `precomputed://gs://iarpa_microns/minnie/minnie65/seg_m1300`. Cloud bucket
//! schemes are rewritten to their public HTTPS endpoints.

use std::fmt;

use crate::error::{Error, Result};

const PRECOMPUTED_PREFIX: &str = "precomputed://";
const GCS_HTTPS: &str = "https://storage.googleapis.com/";
const S3_HTTPS: &str = "https://s3.amazonaws.com/";

/// A parsed store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    original: String,
    base_url: String,
}

impl StoreUri {
    /// Parse a store URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] for unsupported schemes or an empty path.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri.trim().strip_prefix(PRECOMPUTED_PREFIX).unwrap_or(uri.trim());
        let (scheme, path) = rest
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Err(invalid("missing bucket or host"));
        }

        let base_url = match scheme {
            "gs" => format!("{GCS_HTTPS}{path}"),
            "s3" => format!("{S3_HTTPS}{path}"),
            "https" | "http" => format!("{scheme}://{path}"),
            other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
        };

        Ok(Self {
            original: uri.to_string(),
            base_url,
        })
    }

    /// The HTTP(S) URL of the volume root, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a path below the volume root.
    #[must_use]
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Display for StoreUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gs_with_prefix() {
        let uri = StoreUri::parse("precomputed://gs://iarpa_microns/minnie/minnie65/seg_m1300")
            .unwrap();
        assert_eq!(
            uri.base_url(),
            "https://storage.googleapis.com/iarpa_microns/minnie/minnie65/seg_m1300"
        );
        assert_eq!(
            uri.join("mesh/info"),
            "https://storage.googleapis.com/iarpa_microns/minnie/minnie65/seg_m1300/mesh/info"
        );
    }

    #[test]
    fn test_parse_without_prefix() {
        let uri = StoreUri::parse("s3://open-neurodata/seg/").unwrap();
        assert_eq!(uri.base_url(), "https://s3.amazonaws.com/open-neurodata/seg");
        assert_eq!(uri.to_string(), "s3://open-neurodata/seg/");
    }

    #[test]
    fn test_parse_https_passthrough() {
        let uri = StoreUri::parse("precomputed://https://example.org/data/seg").unwrap();
        assert_eq!(uri.base_url(), "https://example.org/data/seg");
        assert_eq!(uri.join("/info"), "https://example.org/data/seg/info");
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        for bad in [
            "graphene://https://minnie.microns-daf.com/segmentation/table/minnie65_public",
            "precomputed://file:///tmp/seg",
            "gs://",
            "iarpa_microns/minnie",
        ] {
            assert!(
                matches!(StoreUri::parse(bad), Err(Error::InvalidUri { .. })),
                "{bad} should be rejected"
            );
        }
    }
}
