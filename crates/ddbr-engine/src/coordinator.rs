//! Restore coordinator
//!
//! Owns the lifecycle of a restore run: signal hooks, manifest and
//! checkpoint loading, the worker pool, the progress reporter, error
//! aggregation, and report emission. Workers pull file descriptors from a
//! capacity-1 queue, so the coordinator blocks while every worker is busy
//! and never races ahead of the pool.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ddbr_common::signal::shutdown_signal;
use ddbr_common::{RestoreError, Result, S3Uri};

use crate::checkpoint::CheckpointStore;
use crate::config::RestoreConfig;
use crate::manifest::ManifestLoader;
use crate::metrics::Metrics;
use crate::record::RecordDecoder;
use crate::report::ReportSink;
use crate::streamer::LineStreamer;
use crate::worker::{run_worker, WorkerContext};
use crate::writer::BatchWriter;

/// Progress reporting cadence
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// A worker counts as active when its status moved within this window
const ACTIVE_WINDOW: Duration = Duration::from_secs(10);

/// Per-worker progress, read by the progress reporter
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub id: usize,
    pub current_file: String,
    pub items_written: i64,
    pub batches_written: i64,
    pub last_error: Option<String>,
    pub started_at: Instant,
    pub last_active: Instant,
}

impl WorkerStatus {
    fn new(id: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            current_file: String::new(),
            items_written: 0,
            batches_written: 0,
            last_error: None,
            started_at: now,
            last_active: now,
        }
    }
}

/// Shared worker-status map; writes are brief
pub(crate) type StatusMap = Arc<RwLock<HashMap<usize, WorkerStatus>>>;

/// Coordinator for a restore run
///
/// All collaborators are injected, so the whole pipeline runs against
/// in-process fakes in tests.
pub struct Coordinator {
    cfg: RestoreConfig,
    manifest: Arc<dyn ManifestLoader>,
    streamer: Arc<dyn LineStreamer>,
    decoder: Arc<dyn RecordDecoder>,
    writer: Arc<dyn BatchWriter>,
    store: Arc<dyn CheckpointStore>,
    report_sink: Option<Arc<dyn ReportSink>>,
    metrics: Arc<Metrics>,
    status: StatusMap,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: RestoreConfig,
        manifest: Arc<dyn ManifestLoader>,
        streamer: Arc<dyn LineStreamer>,
        decoder: Arc<dyn RecordDecoder>,
        writer: Arc<dyn BatchWriter>,
        store: Arc<dyn CheckpointStore>,
        report_sink: Option<Arc<dyn ReportSink>>,
    ) -> Self {
        Self {
            cfg,
            manifest,
            streamer,
            decoder,
            writer,
            store,
            report_sink,
            metrics: Arc::new(Metrics::new()),
            status: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Counters for this run
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run the restore to completion or cancellation
    ///
    /// The report is printed to stdout on success and, once workers have
    /// started, on failure as well, so committed progress is visible.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        // Interrupt/termination translate into cooperative cancellation.
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, cancelling restore");
            signal_cancel.cancel();
        });

        let mut workers_started = false;
        let result = self.run_inner(&cancel, &mut workers_started).await;

        if result.is_ok() || workers_started {
            let report = self.metrics.report();
            println!("{report}");

            if result.is_ok() {
                if let (Some(sink), Some(uri)) = (&self.report_sink, &self.cfg.report_uri) {
                    sink.upload(uri, &report).await?;
                }
            }
        }

        result
    }

    async fn run_inner(
        &self,
        cancel: &CancellationToken,
        workers_started: &mut bool,
    ) -> Result<()> {
        S3Uri::parse(&self.cfg.export_uri)?;
        let bucket = self.cfg.export_bucket()?;

        let summary = self.manifest.load(&self.cfg.export_uri).await?;
        if self.cfg.verify_checksums {
            info!("Verifying data file checksums");
            self.manifest.verify_checksums(&summary).await?;
        }

        let state = self.store.load().await?;
        if !state.last_file.is_empty() {
            info!(
                last_file = %state.last_file,
                last_byte_offset = state.last_byte_offset,
                "Resuming from checkpoint"
            );
        }

        let (tasks_tx, tasks_rx) = async_channel::bounded(1);
        let (results_tx, mut results_rx) = mpsc::channel(self.cfg.max_workers);

        let ctx = Arc::new(WorkerContext {
            bucket,
            batch_size: self.cfg.batch_size,
            streamer: self.streamer.clone(),
            decoder: self.decoder.clone(),
            writer: self.writer.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            status: self.status.clone(),
            cancel: cancel.clone(),
        });

        if let Ok(mut status) = self.status.write() {
            for id in 0..self.cfg.max_workers {
                status.insert(id, WorkerStatus::new(id));
            }
        }

        if !self.cfg.dry_run {
            tokio::spawn(progress_reporter(
                self.status.clone(),
                cancel.clone(),
            ));
        }

        let mut workers = JoinSet::new();
        for id in 0..self.cfg.max_workers {
            let ctx = ctx.clone();
            let tasks = tasks_rx.clone();
            let results = results_tx.clone();
            workers.spawn(async move {
                if let Err(e) = run_worker(ctx, id, tasks).await {
                    error!(worker = id, error = %e, "Worker failed");
                    let _ = results.send(e).await;
                }
            });
        }
        drop(tasks_rx);
        drop(results_tx);
        *workers_started = true;

        // Enqueue in manifest order, skipping files an earlier run finished.
        let mut remaining = 0usize;
        for file in &summary.data_files {
            if file.key.as_str() < state.last_file.as_str() {
                debug!(file = %file.key, "Skipping file behind checkpoint");
                continue;
            }
            remaining += 1;

            tokio::select! {
                sent = tasks_tx.send(file.clone()) => {
                    if sent.is_err() {
                        // Every worker exited early; errors are in the
                        // results channel.
                        break;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }
        drop(tasks_tx);
        debug!(remaining, "All tasks enqueued");

        // Wait for the pool, bounding cleanup once cancellation fires.
        let mut cancelled = false;
        tokio::select! {
            _ = drain_workers(&mut workers) => {},
            _ = cancel.cancelled() => {
                cancelled = true;
            },
        }
        if cancelled {
            if tokio::time::timeout(self.cfg.shutdown_timeout, drain_workers(&mut workers))
                .await
                .is_err()
            {
                warn!("Workers did not exit before the shutdown timeout, aborting them");
                workers.abort_all();
                drain_workers(&mut workers).await;
            }
        }

        let mut errors = Vec::new();
        while let Some(err) = results_rx.recv().await {
            errors.push(err);
        }

        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }
        if !errors.is_empty() {
            return Err(RestoreError::workers_failed(&errors));
        }

        self.writer.flush().await?;
        Ok(())
    }
}

/// Await every worker in the set
async fn drain_workers(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

/// Log aggregate progress every five seconds until cancelled
async fn progress_reporter(status: StatusMap, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (items, batches, active) = match status.read() {
                    Ok(status) => {
                        let mut items = 0i64;
                        let mut batches = 0i64;
                        let mut active = 0usize;
                        for worker in status.values() {
                            items += worker.items_written;
                            batches += worker.batches_written;
                            if worker.last_active.elapsed() < ACTIVE_WINDOW {
                                active += 1;
                            }
                        }
                        (items, batches, active)
                    },
                    Err(_) => continue,
                };
                info!(
                    items_written = items,
                    batches = batches,
                    active_workers = active,
                    "Restore progress"
                );
            },
            _ = cancel.cancelled() => return,
        }
    }
}
