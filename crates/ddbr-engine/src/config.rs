//! Restore configuration and validation
//!
//! All knobs the engine consumes, populated by the CLI and validated before
//! any network call is made.

use std::time::Duration;

use ddbr_common::{RestoreError, Result, S3Uri};

/// Kind of PITR export being restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportType {
    #[default]
    Full,
    Incremental,
}

impl ExportType {
    pub fn as_str(&self) -> &str {
        match self {
            ExportType::Full => "FULL",
            ExportType::Incremental => "INCREMENTAL",
        }
    }
}

impl std::str::FromStr for ExportType {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("FULL") {
            Ok(ExportType::Full)
        } else if s.eq_ignore_ascii_case("INCREMENTAL") {
            Ok(ExportType::Incremental)
        } else {
            Err(RestoreError::config(
                format!("unknown export type '{s}'"),
                "Use FULL or INCREMENTAL.",
            ))
        }
    }
}

/// Image view of an incremental export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewType {
    #[default]
    New,
    NewAndOld,
}

impl ViewType {
    pub fn as_str(&self) -> &str {
        match self {
            ViewType::New => "NEW",
            ViewType::NewAndOld => "NEW_AND_OLD",
        }
    }
}

impl std::str::FromStr for ViewType {
    type Err = RestoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("NEW") {
            Ok(ViewType::New)
        } else if s.eq_ignore_ascii_case("NEW_AND_OLD") {
            Ok(ViewType::NewAndOld)
        } else {
            Err(RestoreError::config(
                format!("unknown view type '{s}'"),
                "Use NEW or NEW_AND_OLD.",
            ))
        }
    }
}

/// Configuration for a restore run
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Target DynamoDB table name
    pub table_name: String,
    /// S3 URI of the export's manifest-summary object
    pub export_uri: String,
    /// FULL or INCREMENTAL
    pub export_type: ExportType,
    /// NEW or NEW_AND_OLD image view
    pub view_type: ViewType,
    /// AWS region; falls back to the environment when unset
    pub region: Option<String>,
    /// Checkpoint URI (`s3://` or `file://`); in-memory store when unset
    pub resume_uri: Option<String>,
    /// Number of concurrent workers
    pub max_workers: usize,
    /// Read-ahead depth of the line streamer, in part-sized batches
    pub read_ahead_parts: usize,
    /// Batch size for table writes (1..=25)
    pub batch_size: usize,
    /// Optional S3 URI for the final JSON report
    pub report_uri: Option<String>,
    /// Validate and decode without writing to the table
    pub dry_run: bool,
    /// Accepted for compatibility; capacity is not modified by the restore
    pub manage_capacity: bool,
    /// Verify data-file checksums against the manifest before restoring
    pub verify_checksums: bool,
    /// How long cleanup may take once cancellation fires
    pub shutdown_timeout: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            export_uri: String::new(),
            export_type: ExportType::Full,
            view_type: ViewType::New,
            region: None,
            resume_uri: None,
            max_workers: 10,
            read_ahead_parts: 5,
            batch_size: 25,
            report_uri: None,
            dry_run: false,
            manage_capacity: false,
            verify_checksums: false,
            shutdown_timeout: Duration::from_secs(300),
        }
    }
}

impl RestoreConfig {
    /// Validate the configuration
    ///
    /// Checks every field the engine relies on so that misconfiguration
    /// fails before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(RestoreError::config(
                "table name is required",
                "Pass --table <name>.",
            ));
        }

        if self.export_uri.is_empty() {
            return Err(RestoreError::config(
                "export URI is required",
                "Pass --export s3://bucket/prefix/manifest-summary.json.",
            ));
        }
        S3Uri::parse(&self.export_uri)?;

        if self.max_workers < 1 {
            return Err(RestoreError::config(
                "max workers must be at least 1",
                "Raise --workers.",
            ));
        }

        if self.read_ahead_parts < 1 {
            return Err(RestoreError::config(
                "read-ahead parts must be at least 1",
                "Raise --read-ahead.",
            ));
        }

        if self.batch_size < 1 || self.batch_size > 25 {
            return Err(RestoreError::config(
                format!("batch size {} out of range", self.batch_size),
                "The table service accepts batches of 1 to 25 items.",
            ));
        }

        if let Some(ref uri) = self.resume_uri {
            if !uri.starts_with("s3://") && !uri.starts_with("file://") {
                return Err(RestoreError::config(
                    format!("resume URI '{uri}' has an unsupported scheme"),
                    "Use s3://bucket/key or file:///absolute/path.",
                ));
            }
        }

        if let Some(ref uri) = self.report_uri {
            S3Uri::parse(uri)?;
        }

        if self.shutdown_timeout < Duration::from_secs(1) {
            return Err(RestoreError::config(
                "shutdown timeout must be at least 1 second",
                "Raise --shutdown-timeout.",
            ));
        }

        Ok(())
    }

    /// Bucket component of the export URI
    pub fn export_bucket(&self) -> Result<String> {
        Ok(S3Uri::parse(&self.export_uri)?.bucket)
    }
}
