//! Worker pipeline
//!
//! Each worker drains one data file at a time from the task queue and runs
//! the inner loop: stream lines, decode, batch, write, checkpoint.
//!
//! HOT PATH: every exported record passes through `stream_file`. The
//! dominant costs are JSON decoding and the table round-trips; checkpoint
//! saves are amortized over [`CHECKPOINT_INTERVAL`] batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ddbr_common::{RestoreError, Result};

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::coordinator::StatusMap;
use crate::manifest::FileDescriptor;
use crate::metrics::Metrics;
use crate::record::RecordDecoder;
use crate::streamer::LineStreamer;
use crate::writer::BatchWriter;

/// Checkpoints are saved every this many batches, balancing durability
/// against object-store write volume
pub(crate) const CHECKPOINT_INTERVAL: u32 = 100;

/// Streaming attempts per file before the worker gives up
const MAX_STREAM_RETRIES: u32 = 3;

/// Shared state handed to every worker
pub(crate) struct WorkerContext {
    pub(crate) bucket: String,
    pub(crate) batch_size: usize,
    pub(crate) streamer: Arc<dyn LineStreamer>,
    pub(crate) decoder: Arc<dyn RecordDecoder>,
    pub(crate) writer: Arc<dyn BatchWriter>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) status: StatusMap,
    pub(crate) cancel: CancellationToken,
}

/// Drain the task queue until it closes, cancellation fires, or a file
/// fails terminally
pub(crate) async fn run_worker(
    ctx: Arc<WorkerContext>,
    id: usize,
    tasks: async_channel::Receiver<FileDescriptor>,
) -> Result<()> {
    loop {
        let file = tokio::select! {
            received = tasks.recv() => match received {
                Ok(file) => file,
                // Queue closed and drained: this worker is done.
                Err(_) => return Ok(()),
            },
            _ = ctx.cancel.cancelled() => return Err(RestoreError::Cancelled),
        };

        ctx.update_status(id, |s| s.current_file = file.key.clone());
        ctx.process_file(id, &file).await?;
    }
}

impl WorkerContext {
    /// Process one data file: resume, stream with retry, drain, complete
    async fn process_file(&self, id: usize, file: &FileDescriptor) -> Result<()> {
        let state = self
            .store
            .load()
            .await
            .map_err(|e| RestoreError::file_failed(&file.key, e))?;

        let mut start_offset = 0i64;
        if state.last_file == file.key {
            if state.is_completed() {
                debug!(worker = id, file = %file.key, "File already completed, skipping");
                return Ok(());
            }
            start_offset = state.last_byte_offset;
        }

        let mut attempt: u32 = 0;
        let outcome = loop {
            if attempt > 0 {
                let wait = Duration::from_secs(1 << attempt);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = self.cancel.cancelled() => break Err(RestoreError::Cancelled),
                }
            }

            match self.stream_file(id, file, start_offset).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_cancelled() => break Err(e),
                Err(e) => {
                    self.record_error(id, &e);
                    attempt += 1;
                    if attempt >= MAX_STREAM_RETRIES {
                        break Err(e);
                    }
                    warn!(
                        worker = id,
                        file = %file.key,
                        attempt,
                        error = %e,
                        "Streaming failed, retrying"
                    );
                },
            }
        };

        outcome.map_err(|e| match e {
            RestoreError::Cancelled => RestoreError::Cancelled,
            other => RestoreError::file_failed(&file.key, other),
        })
    }

    /// One streaming pass over a file from `start_offset`
    async fn stream_file(
        &self,
        id: usize,
        file: &FileDescriptor,
        start_offset: i64,
    ) -> Result<()> {
        let mut stream = self
            .streamer
            .open(&self.bucket, &file.key, start_offset)
            .await?;

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut current_offset = start_offset;
        let mut batches_since_checkpoint: u32 = 0;

        while let Some(line) = stream.next_line().await? {
            if self.cancel.is_cancelled() {
                return Err(RestoreError::Cancelled);
            }
            current_offset = line.offset;

            match self.decoder.decode(&line.bytes) {
                Ok(op) => {
                    batch.push(op);
                    self.metrics.record_processed();
                },
                Err(e) if e.is_corrupt() => {
                    self.metrics.record_corrupt();
                    continue;
                },
                Err(e) => {
                    self.metrics.record_error();
                    return Err(e);
                },
            }

            if batch.len() >= self.batch_size {
                batches_since_checkpoint += 1;
                let checkpoint = batches_since_checkpoint >= CHECKPOINT_INTERVAL;
                self.write_batch(id, &batch, file, current_offset, checkpoint)
                    .await?;
                if checkpoint {
                    batches_since_checkpoint = 0;
                }
                batch.clear();
            }
        }

        // Drain the remainder, then mark the file complete.
        if !batch.is_empty() {
            self.write_batch(id, &batch, file, current_offset, true)
                .await?;
        }
        self.store
            .save(&CheckpointState::completed(&file.key))
            .await
            .map_err(|e| {
                self.record_error(id, &e);
                e
            })?;

        Ok(())
    }

    /// Write one batch with metrics, status, and optional checkpoint save
    async fn write_batch(
        &self,
        id: usize,
        batch: &[crate::record::Operation],
        file: &FileDescriptor,
        offset: i64,
        checkpoint: bool,
    ) -> Result<()> {
        let started = Instant::now();
        self.writer.write_batch(batch).await.map_err(|e| {
            self.record_error(id, &e);
            e
        })?;
        self.metrics.record_processing_time(started.elapsed());
        self.metrics.record_batch_written();

        let written = batch.len() as i64;
        self.update_status(id, |s| {
            s.items_written += written;
            s.batches_written += 1;
        });

        if checkpoint {
            self.store
                .save(&CheckpointState::at(&file.key, offset))
                .await
                .map_err(|e| {
                    self.record_error(id, &e);
                    e
                })?;
        }

        Ok(())
    }

    pub(crate) fn update_status(&self, id: usize, f: impl FnOnce(&mut crate::coordinator::WorkerStatus)) {
        let Ok(mut status) = self.status.write() else {
            return;
        };
        if let Some(entry) = status.get_mut(&id) {
            f(entry);
            entry.last_active = Instant::now();
        }
    }

    fn record_error(&self, id: usize, err: &RestoreError) {
        self.metrics.record_error();
        let message = err.to_string();
        self.update_status(id, |s| s.last_error = Some(message));
    }
}
