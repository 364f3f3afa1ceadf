//! Target table client abstraction
//!
//! The writer only needs two calls: a batched write of put/delete requests
//! and a single-item update. [`TableClient`] captures exactly that, so tests
//! can swap the DynamoDB client for an in-memory table. The implementation
//! classifies service errors into the retry taxonomy: capacity signals
//! become `Throttled`, everything else `TransientIo`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{DeleteRequest, PutRequest, WriteRequest};
use tracing::instrument;

use ddbr_common::{RestoreError, Result};

use crate::record::Item;

/// A composed update: key, expression, and the placeholder maps
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub key: Item,
    /// `"SET ..."`, `"REMOVE ..."`, or `"SET ... REMOVE ..."`
    pub expression: String,
    /// Name placeholders, `#attr` to attribute name
    pub names: HashMap<String, String>,
    /// Value placeholders, `:attr` to value; absent when there are no SETs
    pub values: Option<Item>,
}

/// Contract for applying operations to the target table
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Submit one batched write; returns the unprocessed subset
    async fn batch_write(&self, table: &str, requests: Vec<WriteRequest>)
        -> Result<Vec<WriteRequest>>;

    /// Apply a single-item update expression
    async fn update_item(&self, table: &str, update: UpdateExpression) -> Result<()>;
}

/// Build a put request from an item image
pub fn put_request(image: &Item) -> Result<WriteRequest> {
    let put = PutRequest::builder()
        .set_item(Some(image.clone()))
        .build()
        .map_err(|e| RestoreError::fatal_io(format!("invalid put request: {e}")))?;
    Ok(WriteRequest::builder().put_request(put).build())
}

/// Build a delete request from a key
pub fn delete_request(key: &Item) -> Result<WriteRequest> {
    let delete = DeleteRequest::builder()
        .set_key(Some(key.clone()))
        .build()
        .map_err(|e| RestoreError::fatal_io(format!("invalid delete request: {e}")))?;
    Ok(WriteRequest::builder().delete_request(delete).build())
}

/// DynamoDB implementation of [`TableClient`]
#[derive(Clone)]
pub struct DynamoTableClient {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoTableClient {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableClient for DynamoTableClient {
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>> {
        let out = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|err| {
                let svc = err.into_service_error();
                if svc.is_provisioned_throughput_exceeded_exception()
                    || svc.is_request_limit_exceeded()
                {
                    RestoreError::throttled(svc.to_string())
                } else {
                    RestoreError::transient(format!("batch write failed: {svc}"))
                }
            })?;

        let unprocessed = out
            .unprocessed_items()
            .and_then(|m| m.get(table))
            .cloned()
            .unwrap_or_default();
        Ok(unprocessed)
    }

    #[instrument(skip(self, update))]
    async fn update_item(&self, table: &str, update: UpdateExpression) -> Result<()> {
        let mut req = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(update.key))
            .update_expression(update.expression)
            .set_expression_attribute_names(Some(update.names));
        if let Some(values) = update.values {
            req = req.set_expression_attribute_values(Some(values));
        }

        req.send().await.map_err(|err| {
            let svc = err.into_service_error();
            if svc.is_provisioned_throughput_exceeded_exception() || svc.is_request_limit_exceeded()
            {
                RestoreError::throttled(svc.to_string())
            } else {
                RestoreError::transient(format!("update item failed: {svc}"))
            }
        })?;
        Ok(())
    }
}
