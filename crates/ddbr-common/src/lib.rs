//! DDBR Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities for the DDBR workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all DDBR workspace members:
//!
//! - **Error Handling**: the `RestoreError` taxonomy and `Result` alias
//! - **Logging**: tracing subscriber setup with console/file output
//! - **URIs**: `s3://` and `file://` parsing and validation
//! - **Checksums**: MD5 helpers for manifest verification
//! - **Signals**: graceful-shutdown signal future

pub mod checksum;
pub mod error;
pub mod logging;
pub mod s3uri;
pub mod signal;

// Re-export commonly used types
pub use error::{RestoreError, Result};
pub use s3uri::S3Uri;
