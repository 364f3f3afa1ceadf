//! Table writer
//!
//! Translates decoded operations into table calls and owns the retry
//! policy. PUT and DELETE are accumulated into batched writes; UPDATE
//! cannot be batched and goes out as individual item modifications.
//!
//! Retry policy:
//! - throttling (capacity signals, unprocessed items): exponential backoff
//!   with jitter, retried until cancellation
//! - other errors: same backoff, at most [`MAX_RETRIES`] attempts
//!
//! HOT PATH: called for every batch of decoded records; the dominant costs
//! are the table round-trips and backoff sleeps under throttling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::WriteRequest;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ddbr_common::{RestoreError, Result};

use crate::record::{Item, Operation};
use crate::table::{delete_request, put_request, TableClient, UpdateExpression};

/// Maximum attempts for non-throttling errors
const MAX_RETRIES: u32 = 5;

/// Base backoff delay
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Backoff delay cap
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Contract for writing batches of operations
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Apply a slice of operations, splitting into sub-batches as needed
    async fn write_batch(&self, ops: &[Operation]) -> Result<()>;

    /// Flush buffered state; the table writer writes immediately, so this
    /// exists for the contract and is a no-op
    async fn flush(&self) -> Result<()>;
}

/// Sleep for an exponentially increasing delay with jitter
///
/// Delay for attempt `k` is `min(base * 2^k, cap)` plus uniform jitter in
/// `[0, delay)`. Returns `false` when cancelled during the wait.
async fn backoff_wait(cancel: &CancellationToken, attempt: u32) -> bool {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(16));
    let delay = exp.min(BACKOFF_CAP);
    let jitter_ms = rand::thread_rng().gen_range(0..delay.as_millis().max(1) as u64);
    let delay = delay + Duration::from_millis(jitter_ms);

    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Writer that applies operations through a [`TableClient`]
pub struct TableWriter {
    client: Arc<dyn TableClient>,
    table_name: String,
    batch_size: usize,
    cancel: CancellationToken,
}

impl TableWriter {
    pub fn new(
        client: Arc<dyn TableClient>,
        table_name: impl Into<String>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            batch_size: batch_size.clamp(1, 25),
            cancel,
        }
    }

    /// Submit one sub-batch, retrying throttles and unprocessed items
    async fn submit_batch(&self, mut requests: Vec<WriteRequest>) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .client
                .batch_write(&self.table_name, requests.clone())
                .await
            {
                Ok(unprocessed) if unprocessed.is_empty() => return Ok(()),
                Ok(unprocessed) => {
                    // Unprocessed items are the table telling us to slow
                    // down; resubmit only the leftover subset.
                    debug!(
                        unprocessed = unprocessed.len(),
                        attempt, "Batch partially processed, backing off"
                    );
                    requests = unprocessed;
                    if !backoff_wait(&self.cancel, attempt).await {
                        return Err(RestoreError::Cancelled);
                    }
                    attempt += 1;
                },
                Err(e) if e.is_throttled() => {
                    debug!(attempt, error = %e, "Batch write throttled, backing off");
                    if !backoff_wait(&self.cancel, attempt).await {
                        return Err(RestoreError::Cancelled);
                    }
                    attempt += 1;
                },
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(RestoreError::transient(format!(
                            "batch write failed after {MAX_RETRIES} retries: {e}"
                        )));
                    }
                    warn!(attempt, error = %e, "Batch write failed, will retry");
                    if !backoff_wait(&self.cancel, attempt).await {
                        return Err(RestoreError::Cancelled);
                    }
                    attempt += 1;
                },
            }
        }
    }

    /// Issue one update, retrying under the same policy as batches
    async fn submit_update(&self, update: UpdateExpression) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .client
                .update_item(&self.table_name, update.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_throttled() => {
                    debug!(attempt, error = %e, "Update throttled, backing off");
                    if !backoff_wait(&self.cancel, attempt).await {
                        return Err(RestoreError::Cancelled);
                    }
                    attempt += 1;
                },
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(RestoreError::transient(format!(
                            "update failed after {MAX_RETRIES} retries: {e}"
                        )));
                    }
                    warn!(attempt, error = %e, "Update failed, will retry");
                    if !backoff_wait(&self.cancel, attempt).await {
                        return Err(RestoreError::Cancelled);
                    }
                    attempt += 1;
                },
            }
        }
    }
}

#[async_trait]
impl BatchWriter for TableWriter {
    async fn write_batch(&self, ops: &[Operation]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        for chunk in ops.chunks(self.batch_size) {
            let mut requests = Vec::with_capacity(chunk.len());
            for op in chunk {
                match op {
                    Operation::Put { image } => requests.push(put_request(image)?),
                    Operation::Delete { key } => requests.push(delete_request(key)?),
                    Operation::Update {
                        key,
                        new_image,
                        old_image,
                    } => {
                        if let Some(update) = build_update_expression(key, new_image, old_image) {
                            self.submit_update(update).await?;
                        }
                    },
                }
            }

            if requests.is_empty() {
                continue;
            }
            self.submit_batch(requests).await?;
        }

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Derive the SET/REMOVE expression for an update
///
/// Non-key attributes present in the new image are SET; attributes present
/// only in the old image are REMOVEd. Key attributes are never touched.
/// Returns `None` when there is nothing to change. Clauses are emitted in
/// sorted attribute order so the composed expression is deterministic.
pub fn build_update_expression(
    key: &Item,
    new_image: &Item,
    old_image: &Item,
) -> Option<UpdateExpression> {
    let mut set_names: Vec<&String> = new_image
        .keys()
        .filter(|name| !key.contains_key(*name))
        .collect();
    set_names.sort();

    let mut remove_names: Vec<&String> = old_image
        .keys()
        .filter(|name| !key.contains_key(*name) && !new_image.contains_key(*name))
        .collect();
    remove_names.sort();

    if set_names.is_empty() && remove_names.is_empty() {
        return None;
    }

    let mut names = HashMap::with_capacity(set_names.len() + remove_names.len());
    let mut expression = String::new();

    if !set_names.is_empty() {
        let clauses: Vec<String> = set_names
            .iter()
            .map(|name| format!("#{name} = :{name}"))
            .collect();
        expression.push_str("SET ");
        expression.push_str(&clauses.join(", "));
    }

    if !remove_names.is_empty() {
        if !expression.is_empty() {
            expression.push(' ');
        }
        let clauses: Vec<String> = remove_names.iter().map(|name| format!("#{name}")).collect();
        expression.push_str("REMOVE ");
        expression.push_str(&clauses.join(", "));
    }

    let values = if set_names.is_empty() {
        None
    } else {
        let mut values = Item::with_capacity(set_names.len());
        for name in &set_names {
            if let Some(value) = new_image.get(*name) {
                values.insert(format!(":{name}"), value.clone());
            }
        }
        Some(values)
    };

    for name in set_names.into_iter().chain(remove_names) {
        names.insert(format!("#{name}"), name.clone());
    }

    Some(UpdateExpression {
        key: key.clone(),
        expression,
        names,
        values,
    })
}

/// Writer for dry runs: accepts every batch without touching the table
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriter;

impl NoopWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchWriter for NoopWriter {
    async fn write_batch(&self, ops: &[Operation]) -> Result<()> {
        debug!(count = ops.len(), "Dry run, skipping batch write");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
