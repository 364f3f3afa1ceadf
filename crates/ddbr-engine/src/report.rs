//! Report upload
//!
//! When a report URI is configured, the final report is also written to the
//! object store as a single JSON document.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use ddbr_common::{Result, S3Uri};

use crate::metrics::Report;
use crate::storage::ObjectStore;

/// Contract for publishing the final report
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn upload(&self, uri: &str, report: &Report) -> Result<()>;
}

/// [`ReportSink`] that writes the JSON report to an `s3://` URI
pub struct S3ReportUploader {
    store: Arc<dyn ObjectStore>,
}

impl S3ReportUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReportSink for S3ReportUploader {
    async fn upload(&self, uri: &str, report: &Report) -> Result<()> {
        let target = S3Uri::parse(uri)?;
        let body = serde_json::to_vec_pretty(report)?;
        self.store.put(&target.bucket, &target.key, body).await?;
        info!(uri, "Report uploaded");
        Ok(())
    }
}
