//! MD5 checksum utilities for export verification
//!
//! DynamoDB export manifests carry a Base64-encoded MD5 per data file, while
//! S3 exposes the hex MD5 of single-part objects as the ETag. These helpers
//! bridge the two encodings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{RestoreError, Result};

/// Compute the hex MD5 digest of a byte slice
pub fn compute_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{digest:x}")
}

/// Decode a Base64 MD5 checksum into its hex form
pub fn md5_base64_to_hex(encoded: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| RestoreError::manifest_malformed(format!("invalid Base64 MD5 checksum '{encoded}': {e}")))?;
    Ok(hex::encode(bytes))
}

/// Compare an S3 ETag against a hex MD5, ignoring surrounding quotes and case
///
/// S3 returns ETags wrapped in double quotes; some S3-compatible stores do
/// not. Multipart uploads produce compound ETags that are not an MD5 at all,
/// see [`is_multipart_etag`].
pub fn etag_matches(etag: &str, expected_md5_hex: &str) -> bool {
    etag.trim_matches('"').eq_ignore_ascii_case(expected_md5_hex)
}

/// True when an ETag has the `<hex>-<part count>` shape of a multipart upload
pub fn is_multipart_etag(etag: &str) -> bool {
    match etag.trim_matches('"').rsplit_once('-') {
        Some((_, parts)) => !parts.is_empty() && parts.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
