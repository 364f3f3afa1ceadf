//! Manifest loading and verification
//!
//! A PITR export set is described by two objects: `manifest-summary.json`,
//! a single JSON document of export-level metadata, and the manifest-files
//! object it points at, one JSON object per line describing each data file.
//! The loader composes both into an [`ExportSummary`].

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ddbr_common::checksum::{etag_matches, is_multipart_etag, md5_base64_to_hex};
use ddbr_common::{RestoreError, Result, S3Uri};

use crate::storage::ObjectStore;

/// Export-level metadata from `manifest-summary.json`
///
/// Unknown fields are ignored; missing fields default so older manifest
/// versions still load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSummary {
    pub version: String,
    pub export_arn: String,
    pub start_time: String,
    pub end_time: String,
    pub table_arn: String,
    pub table_id: String,
    pub export_time: String,
    pub export_from_time: String,
    pub export_to_time: String,
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub s3_sse_algorithm: String,
    pub s3_sse_kms_key_id: String,
    pub manifest_files_s3_key: String,
    pub billed_size_bytes: i64,
    pub item_count: i64,
    pub output_format: String,
    pub output_view: String,
    pub export_type: String,

    /// Parsed from the manifest-files object
    #[serde(skip)]
    pub data_files: Vec<FileDescriptor>,
}

/// One line of the manifest-files object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileDescriptor {
    /// S3 key of the data file
    #[serde(rename = "dataFileS3Key")]
    pub key: String,
    /// Storage ETag recorded at export time
    pub etag: String,
    /// Base64-encoded MD5 of the data file
    #[serde(rename = "md5Checksum")]
    pub md5_base64: String,
    /// Number of items in this file
    #[serde(rename = "itemCount")]
    pub item_count: i64,
}

/// Contract for loading and verifying export manifests
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    /// Load and compose the export summary from a manifest-summary URI
    async fn load(&self, manifest_uri: &str) -> Result<ExportSummary>;

    /// Verify each data file's stored ETag against its manifest MD5
    async fn verify_checksums(&self, summary: &ExportSummary) -> Result<()>;
}

/// [`ManifestLoader`] over an [`ObjectStore`]
pub struct S3ManifestLoader {
    store: Arc<dyn ObjectStore>,
}

impl S3ManifestLoader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ManifestLoader for S3ManifestLoader {
    async fn load(&self, manifest_uri: &str) -> Result<ExportSummary> {
        let uri = S3Uri::parse(manifest_uri)?;

        let body = self
            .store
            .get(&uri.bucket, &uri.key)
            .await?
            .ok_or_else(|| RestoreError::manifest_not_found(manifest_uri))?;
        if body.is_empty() {
            return Err(RestoreError::manifest_malformed(format!(
                "summary object '{manifest_uri}' is empty"
            )));
        }

        let mut summary: ExportSummary = serde_json::from_slice(&body).map_err(|e| {
            RestoreError::manifest_malformed(format!("failed to decode summary: {e}"))
        })?;

        if summary.manifest_files_s3_key.is_empty() {
            return Err(RestoreError::manifest_malformed(
                "summary is missing manifestFilesS3Key".to_string(),
            ));
        }

        let files_uri = format!("s3://{}/{}", uri.bucket, summary.manifest_files_s3_key);
        let files_body = self
            .store
            .get(&uri.bucket, &summary.manifest_files_s3_key)
            .await?
            .ok_or_else(|| RestoreError::manifest_not_found(&files_uri))?;

        // One JSON object per line; blank lines are tolerated and EOF ends
        // the sequence.
        let mut data_files = Vec::with_capacity(64);
        for line in files_body.split(|b| *b == b'\n') {
            let line = trim_ascii(line);
            if line.is_empty() {
                continue;
            }
            let file: FileDescriptor = serde_json::from_slice(line).map_err(|e| {
                RestoreError::manifest_malformed(format!("bad manifest-files entry: {e}"))
            })?;
            data_files.push(file);
        }
        summary.data_files = data_files;

        info!(
            export_type = %summary.export_type,
            item_count = summary.item_count,
            data_files = summary.data_files.len(),
            "Loaded export manifest"
        );
        Ok(summary)
    }

    async fn verify_checksums(&self, summary: &ExportSummary) -> Result<()> {
        if summary.s3_bucket.is_empty() {
            return Err(RestoreError::manifest_malformed(
                "summary does not name an S3 bucket".to_string(),
            ));
        }

        for file in &summary.data_files {
            let meta = self
                .store
                .head(&summary.s3_bucket, &file.key)
                .await?
                .ok_or_else(|| {
                    RestoreError::fatal_io(format!(
                        "data file listed in manifest is missing: s3://{}/{}",
                        summary.s3_bucket, file.key
                    ))
                })?;

            let etag = meta.etag.ok_or_else(|| {
                RestoreError::fatal_io(format!("store returned no ETag for '{}'", file.key))
            })?;

            // A compound ETag means the object was uploaded in parts and is
            // not comparable to an MD5.
            if is_multipart_etag(&etag) {
                warn!(file = %file.key, etag = %etag, "Skipping checksum of multipart-uploaded object");
                continue;
            }

            let expected = md5_base64_to_hex(&file.md5_base64)?;
            if !etag_matches(&etag, &expected) {
                return Err(RestoreError::checksum_mismatch(
                    &file.key,
                    expected,
                    etag.trim_matches('"').to_string(),
                ));
            }
            debug!(file = %file.key, "Checksum verified");
        }

        Ok(())
    }
}

/// Trim ASCII whitespace from both ends of a byte slice
fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let Some((first, rest)) = bytes.split_first() {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = bytes.split_last() {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
