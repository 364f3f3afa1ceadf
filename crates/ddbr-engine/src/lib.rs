//! DDBR Restore Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Parallel streaming restore of a DynamoDB table from a PITR export set in
//! S3. An export is a collection of gzip-compressed JSON-lines data objects
//! plus two manifest objects; the engine reads them, decodes each line into
//! a PUT/DELETE/UPDATE operation, and applies the operations to the target
//! table with throttling-aware retry and restart-safe checkpointing.
//!
//! # Pipeline
//!
//! The [`coordinator::Coordinator`] loads the manifest, enqueues one task
//! per data file, and fans the tasks out to a pool of workers. Each worker
//! streams its file line by line ([`streamer`]), decodes ([`record`]),
//! batches writes ([`writer`]), and periodically persists a resumable
//! checkpoint ([`checkpoint`]). Counters and the final report live in
//! [`metrics`].
//!
//! External services sit behind small traits (`ObjectStore`, `TableClient`,
//! `ManifestLoader`, `LineStreamer`, `RecordDecoder`, `BatchWriter`,
//! `CheckpointStore`, `ReportSink`), swapped via constructor injection so
//! every stage is testable against in-process fakes.

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod manifest;
pub mod metrics;
pub mod record;
pub mod report;
pub mod storage;
pub mod streamer;
pub mod table;
mod worker;
pub mod writer;

// Re-export commonly used types
pub use checkpoint::{CheckpointState, CheckpointStore, FileStore, MemoryStore, S3Store, COMPLETED_OFFSET};
pub use config::{ExportType, RestoreConfig, ViewType};
pub use coordinator::{Coordinator, WorkerStatus};
pub use manifest::{ExportSummary, FileDescriptor, ManifestLoader, S3ManifestLoader};
pub use metrics::{Metrics, Report};
pub use record::{Item, JsonRecordDecoder, Operation, RecordDecoder};
pub use report::{ReportSink, S3ReportUploader};
pub use storage::{MemoryObjectStore, ObjectStore, S3Storage};
pub use streamer::{Line, LineStream, LineStreamer, ObjectLineStreamer};
pub use table::{DynamoTableClient, TableClient, UpdateExpression};
pub use writer::{BatchWriter, NoopWriter, TableWriter};
