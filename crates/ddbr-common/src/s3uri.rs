//! S3 and file URI parsing
//!
//! Everything the restore tool addresses lives behind a URI: the export
//! manifest, data files, the checkpoint object and the report target. All of
//! them must resolve to `s3://bucket/key` (or `file:///abs/path` for the
//! local checkpoint store), and malformed URIs fail before any network call.

use std::fmt;
use std::path::PathBuf;

use crate::error::{RestoreError, Result};

/// A parsed `s3://bucket/key` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    /// Parse an `s3://bucket/key` URI
    ///
    /// Both the bucket and the key must be non-empty; anything else is
    /// rejected with `InvalidUri`.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| RestoreError::invalid_uri(uri, "expected s3://bucket/key"))?;

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| RestoreError::invalid_uri(uri, "missing object key after bucket"))?;

        if bucket.is_empty() || key.is_empty() {
            return Err(RestoreError::invalid_uri(
                uri,
                "bucket and key must be non-empty",
            ));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Parse a `file://` URI into an absolute filesystem path
///
/// Relative paths are rejected: the checkpoint file must not depend on the
/// working directory of the process that resumes the restore.
pub fn parse_file_uri(uri: &str) -> Result<PathBuf> {
    let path = uri
        .strip_prefix("file://")
        .ok_or_else(|| RestoreError::invalid_uri(uri, "expected file:///absolute/path"))?;

    let path = PathBuf::from(path);
    if !path.is_absolute() {
        return Err(RestoreError::invalid_uri(uri, "path must be absolute"));
    }

    Ok(path)
}
