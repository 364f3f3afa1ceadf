//! Line streaming from the object store
//!
//! Workers consume data files one decoded line at a time. The contract is
//! [`LineStreamer::open`] at a byte offset plus [`LineStream::next_line`];
//! offsets are positions of line starts in the decoded stream, which is what
//! the checkpoint records.
//!
//! [`ObjectLineStreamer`] is the production implementation. Plain objects
//! are range-read starting at the requested offset. Gzip objects cannot be
//! seeked, so they are streamed from the beginning through a decoder and
//! lines before the offset are dropped. Decoding runs on a blocking thread;
//! lines travel to the worker in part-sized batches over a bounded channel,
//! which is where the read-ahead depth comes from.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use ddbr_common::{RestoreError, Result};

use crate::storage::{ObjectReader, ObjectStore};

/// Bytes accumulated before a batch is handed to the channel
const PART_BYTES: usize = 256 * 1024;

/// One decoded line and the offset of its first byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub bytes: Vec<u8>,
    pub offset: i64,
}

/// An open, positioned stream of lines
#[async_trait]
pub trait LineStream: Send + std::fmt::Debug {
    /// Next line, or `None` at end of stream
    async fn next_line(&mut self) -> Result<Option<Line>>;
}

/// Contract for opening a data object at a byte offset
#[async_trait]
pub trait LineStreamer: Send + Sync {
    async fn open(&self, bucket: &str, key: &str, offset: i64) -> Result<Box<dyn LineStream>>;
}

/// Production [`LineStreamer`] over an [`ObjectStore`]
pub struct ObjectLineStreamer {
    store: Arc<dyn ObjectStore>,
    read_ahead_parts: usize,
}

impl ObjectLineStreamer {
    pub fn new(store: Arc<dyn ObjectStore>, read_ahead_parts: usize) -> Self {
        Self {
            store,
            read_ahead_parts: read_ahead_parts.max(1),
        }
    }
}

#[async_trait]
impl LineStreamer for ObjectLineStreamer {
    async fn open(&self, bucket: &str, key: &str, offset: i64) -> Result<Box<dyn LineStream>> {
        let offset = offset.max(0);
        let gzip = key.ends_with(".gz");
        // Gzip members cannot be entered mid-stream; start at zero and skip
        // decoded lines up to the offset instead.
        let fetch_offset = if gzip { 0 } else { offset as u64 };

        let reader = self
            .store
            .get_reader(bucket, key, fetch_offset)
            .await?
            .ok_or_else(|| {
                RestoreError::transient(format!("data object not found: s3://{bucket}/{key}"))
            })?;

        let bridge = SyncIoBridge::new(reader);
        let (tx, rx) = mpsc::channel(self.read_ahead_parts);
        let skip_before = if gzip { offset } else { 0 };
        let base_offset = fetch_offset as i64;

        debug!(bucket, key, offset, gzip, "Opening line stream");
        tokio::task::spawn_blocking(move || read_lines(bridge, gzip, base_offset, skip_before, tx));

        Ok(Box::new(ChannelLineStream {
            rx,
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// Blocking half: decode, split into lines, batch, and push to the channel
fn read_lines(
    bridge: SyncIoBridge<ObjectReader>,
    gzip: bool,
    base_offset: i64,
    skip_before: i64,
    tx: mpsc::Sender<Result<Vec<Line>>>,
) {
    let reader: Box<dyn Read + Send> = if gzip {
        Box::new(GzDecoder::new(bridge))
    } else {
        Box::new(bridge)
    };
    let mut reader = BufReader::with_capacity(PART_BYTES, reader);

    let mut pos = base_offset;
    let mut batch: Vec<Line> = Vec::new();
    let mut batch_bytes = 0usize;

    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(n) => {
                let start = pos;
                pos += n as i64;

                if line.ends_with(b"\n") {
                    line.pop();
                }
                if line.ends_with(b"\r") {
                    line.pop();
                }

                if start < skip_before {
                    continue;
                }

                batch_bytes += line.len();
                batch.push(Line {
                    bytes: line,
                    offset: start,
                });

                if batch_bytes >= PART_BYTES {
                    if tx.blocking_send(Ok(std::mem::take(&mut batch))).is_err() {
                        // Receiver went away; stop reading.
                        return;
                    }
                    batch_bytes = 0;
                }
            },
            Err(e) => {
                let _ = tx.blocking_send(Err(RestoreError::transient(format!(
                    "reading data object failed: {e}"
                ))));
                return;
            },
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(Ok(batch));
    }
}

/// Async half: drains line batches from the blocking reader
#[derive(Debug)]
struct ChannelLineStream {
    rx: mpsc::Receiver<Result<Vec<Line>>>,
    pending: VecDeque<Line>,
    done: bool,
}

#[async_trait]
impl LineStream for ChannelLineStream {
    async fn next_line(&mut self) -> Result<Option<Line>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.done {
                return Ok(None);
            }
            match self.rx.recv().await {
                Some(Ok(lines)) => self.pending.extend(lines),
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                },
                None => {
                    self.done = true;
                    return Ok(None);
                },
            }
        }
    }
}
