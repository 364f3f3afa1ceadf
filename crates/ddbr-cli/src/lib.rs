//! DDBR CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Flag surface and dependency wiring for the `ddbr` binary.
//!
//! The CLI builds a validated [`RestoreConfig`], constructs the AWS clients
//! and checkpoint store the flags select, and hands everything to the
//! engine's coordinator.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ddbr_common::Result;
use ddbr_engine::{
    BatchWriter, CheckpointStore, Coordinator, DynamoTableClient, FileStore, JsonRecordDecoder,
    MemoryStore, NoopWriter, ObjectLineStreamer, ObjectStore, ReportSink, RestoreConfig,
    S3ManifestLoader, S3ReportUploader, S3Storage, S3Store, TableWriter,
};

/// Restore a DynamoDB table from a PITR export in S3
#[derive(Parser, Debug)]
#[command(name = "ddbr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// DynamoDB table name to restore into
    #[arg(long)]
    pub table: String,

    /// S3 URI of the export (s3://bucket/prefix/manifest-summary.json)
    #[arg(long)]
    pub export: String,

    /// Export type (FULL|INCREMENTAL)
    #[arg(long = "type", default_value = "FULL")]
    pub export_type: String,

    /// View type (NEW|NEW_AND_OLD)
    #[arg(long = "view", default_value = "NEW")]
    pub view: String,

    /// AWS region (defaults to AWS_REGION)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Checkpoint URI for resumable restores (s3://... or file://...)
    #[arg(long = "resume")]
    pub resume: Option<String>,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 10)]
    pub workers: usize,

    /// Number of parts the line streamer reads ahead
    #[arg(long = "read-ahead", default_value_t = 5)]
    pub read_ahead: usize,

    /// Batch size for table writes (1-25)
    #[arg(long = "batch", default_value_t = 25)]
    pub batch: usize,

    /// S3 URI for the final JSON report
    #[arg(long = "report")]
    pub report: Option<String>,

    /// Decode the export without writing to the table
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Accepted for compatibility; capacity is not modified
    #[arg(long = "manage-capacity")]
    pub manage_capacity: bool,

    /// Verify data file checksums against the manifest before restoring
    #[arg(long = "verify-checksums")]
    pub verify_checksums: bool,

    /// Graceful shutdown timeout in seconds
    #[arg(long = "shutdown-timeout", default_value_t = 300)]
    pub shutdown_timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Build and validate the engine configuration
    pub fn to_config(&self) -> Result<RestoreConfig> {
        let cfg = RestoreConfig {
            table_name: self.table.clone(),
            export_uri: self.export.clone(),
            export_type: self.export_type.parse()?,
            view_type: self.view.parse()?,
            region: self.region.clone(),
            resume_uri: self.resume.clone(),
            max_workers: self.workers,
            read_ahead_parts: self.read_ahead,
            batch_size: self.batch,
            report_uri: self.report.clone(),
            dry_run: self.dry_run,
            manage_capacity: self.manage_capacity,
            verify_checksums: self.verify_checksums,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Wire up AWS clients and run the restore
pub async fn run(cli: &Cli) -> Result<()> {
    let cfg = cli.to_config()?;

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = cfg.region.clone() {
        loader = loader.region(aws_config::Region::new(region));
    }
    let aws_cfg = loader.load().await;

    let storage: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(aws_sdk_s3::Client::new(&aws_cfg)));
    let cancel = CancellationToken::new();

    let writer: Arc<dyn BatchWriter> = if cfg.dry_run {
        info!("Dry run: no writes will reach the table");
        Arc::new(NoopWriter::new())
    } else {
        let client = Arc::new(DynamoTableClient::new(aws_sdk_dynamodb::Client::new(&aws_cfg)));
        Arc::new(TableWriter::new(
            client,
            &cfg.table_name,
            cfg.batch_size,
            cancel.clone(),
        ))
    };

    let checkpoints: Arc<dyn CheckpointStore> = match cfg.resume_uri.as_deref() {
        None => Arc::new(MemoryStore::new()),
        Some(uri) if uri.starts_with("file://") => Arc::new(FileStore::new(uri)?),
        Some(uri) => Arc::new(S3Store::new(storage.clone(), uri)?),
    };

    let report_sink: Option<Arc<dyn ReportSink>> = cfg
        .report_uri
        .as_ref()
        .map(|_| Arc::new(S3ReportUploader::new(storage.clone())) as Arc<dyn ReportSink>);

    if cfg.manage_capacity {
        warn!("--manage-capacity is accepted but table capacity is not modified");
    }

    info!(table = %cfg.table_name, export = %cfg.export_uri, workers = cfg.max_workers, "Starting restore");

    let coordinator = Coordinator::new(
        cfg,
        Arc::new(S3ManifestLoader::new(storage.clone())),
        Arc::new(ObjectLineStreamer::new(storage, cli.read_ahead)),
        Arc::new(JsonRecordDecoder::new()),
        writer,
        checkpoints,
        report_sink,
    );

    coordinator.run(cancel).await?;
    info!("Restore completed");
    Ok(())
}
