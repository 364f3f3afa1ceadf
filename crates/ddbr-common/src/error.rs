//! Error types for DDBR
//!
//! This module provides the restore error taxonomy. Each failure mode that
//! callers handle differently gets its own variant, so retry loops and the
//! coordinator can classify errors without string matching.

use thiserror::Error;

/// Result type alias for DDBR operations
pub type Result<T> = std::result::Result<T, RestoreError>;

/// Main error type for the restore pipeline
///
/// Variants map to how the error is handled: `Corrupt` is counted and the
/// record is dropped, `Throttled` and `TransientIo` are retried, the rest
/// surface to the caller.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// File system operations failed (read, write, create directory, etc.)
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("Failed to process JSON data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A URI did not match the expected scheme or shape
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The manifest object does not exist in the object store
    #[error("Manifest not found at '{uri}'. Check the export URI points at a manifest-summary.json object.")]
    ManifestNotFound { uri: String },

    /// The manifest object exists but could not be decoded
    #[error("Malformed manifest: {0}")]
    ManifestMalformed(String),

    /// A data file's stored ETag does not match the manifest checksum
    #[error("Checksum verification failed for '{file}': expected '{expected}', got '{actual}'. The export may be corrupted or incomplete.")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// A single record could not be parsed; counted and skipped, never fatal
    #[error("corrupt record")]
    Corrupt,

    /// The target table signalled a capacity limit; retried until cancelled
    #[error("Write throttled by target table: {0}")]
    Throttled(String),

    /// A retryable I/O failure against an external service
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// A non-retryable I/O failure
    #[error("Fatal I/O failure: {0}")]
    FatalIo(String),

    /// The operation was cancelled by a shutdown signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration is missing or invalid
    #[error("Configuration error: {message}. {suggestion}")]
    ConfigInvalid { message: String, suggestion: String },

    /// A worker exhausted its retries on one data file
    #[error("Failed to process file '{file}': {source}")]
    FileFailed {
        file: String,
        #[source]
        source: Box<RestoreError>,
    },

    /// One or more workers failed; carries the joined detail
    #[error("{0}")]
    WorkersFailed(String),
}

impl RestoreError {
    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest not found error
    pub fn manifest_not_found(uri: impl Into<String>) -> Self {
        Self::ManifestNotFound { uri: uri.into() }
    }

    /// Create a malformed manifest error
    pub fn manifest_malformed(msg: impl Into<String>) -> Self {
        Self::ManifestMalformed(msg.into())
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch(
        file: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            file: file.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a throttling error
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    /// Create a transient I/O error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    /// Create a fatal I/O error
    pub fn fatal_io(msg: impl Into<String>) -> Self {
        Self::FatalIo(msg.into())
    }

    /// Create a configuration error with a suggestion
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Tag an error with the data file it occurred on
    pub fn file_failed(file: impl Into<String>, source: RestoreError) -> Self {
        Self::FileFailed {
            file: file.into(),
            source: Box::new(source),
        }
    }

    /// Aggregate worker errors into a single failure
    pub fn workers_failed(errors: &[RestoreError]) -> Self {
        let detail = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self::WorkersFailed(format!("{} worker(s) failed: {detail}", errors.len()))
    }

    /// True for single-record parse failures that are counted and skipped
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt)
    }

    /// True for capacity signals that are retried indefinitely
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// True when the error came from a cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(RestoreError::Corrupt.is_corrupt());
        assert!(RestoreError::throttled("slow down").is_throttled());
        assert!(RestoreError::Cancelled.is_cancelled());
        assert!(!RestoreError::transient("boom").is_throttled());
        assert!(!RestoreError::transient("boom").is_corrupt());
    }

    #[test]
    fn test_file_failed_wraps_source() {
        let err = RestoreError::file_failed("data/file1.json.gz", RestoreError::transient("timeout"));
        let msg = err.to_string();
        assert!(msg.contains("data/file1.json.gz"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_workers_failed_joins_details() {
        let errs = vec![
            RestoreError::transient("a"),
            RestoreError::throttled("b"),
        ];
        let agg = RestoreError::workers_failed(&errs);
        let msg = agg.to_string();
        assert!(msg.starts_with("2 worker(s) failed"));
        assert!(msg.contains("a"));
        assert!(msg.contains("b"));
    }
}
