//! Shared fixtures for engine integration tests
//!
//! Provides an in-memory table client that applies put/delete/update
//! requests the way the real service would, plus builders that lay a
//! complete export set (summary, manifest-files, data objects) into a
//! `MemoryObjectStore`.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, WriteRequest};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use ddbr_common::checksum::compute_md5;
use ddbr_common::Result;
use ddbr_engine::{Item, MemoryObjectStore, TableClient, UpdateExpression};

pub const BUCKET: &str = "test-bucket";
pub const EXPORT_PREFIX: &str = "AWSDynamoDB/01768385930622-efd1a093";

/// In-memory table applying the same semantics the restore relies on:
/// puts overwrite, deletes of missing keys are no-ops, update expressions
/// SET and REMOVE attributes on the addressed item.
#[derive(Default)]
pub struct MockTableClient {
    tables: Mutex<HashMap<String, HashMap<String, Item>>>,
    batch_sizes: Mutex<Vec<usize>>,
    scripted_errors: Mutex<VecDeque<ddbr_common::RestoreError>>,
}

impl MockTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned before writes start succeeding
    pub fn script_error(&self, err: ddbr_common::RestoreError) {
        self.scripted_errors.lock().unwrap().push_back(err);
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn get_item(&self, table: &str, pk: &str, sk: &str) -> Option<Item> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|t| t.get(&composite(pk, sk)).cloned())
    }

    pub fn item_exists(&self, table: &str, pk: &str, sk: &str) -> bool {
        self.get_item(table, pk, sk).is_some()
    }

    /// Seed an item directly, bypassing the restore path
    pub fn seed_item(&self, table: &str, item: Item) {
        let key = composite_from_item(&item);
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(key, item);
    }
}

fn attr_text(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) => s.clone(),
        AttributeValue::N(n) => n.clone(),
        _ => String::new(),
    }
}

fn composite(pk: &str, sk: &str) -> String {
    format!("pk={pk}#sk={sk}")
}

fn composite_from_item(item: &Item) -> String {
    let pk = item.get("pk").map(attr_text).unwrap_or_default();
    let sk = item.get("sk").map(attr_text).unwrap_or_default();
    composite(&pk, &sk)
}

#[async_trait]
impl TableClient for MockTableClient {
    async fn batch_write(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>> {
        self.batch_sizes.lock().unwrap().push(requests.len());
        if let Some(err) = self.scripted_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();

        for request in requests {
            if let Some(put) = request.put_request() {
                let item: Item = put.item().clone();
                entries.insert(composite_from_item(&item), item);
            }
            if let Some(delete) = request.delete_request() {
                let key: Item = delete.key().clone();
                entries.remove(&composite_from_item(&key));
            }
        }
        Ok(Vec::new())
    }

    async fn update_item(&self, table: &str, update: UpdateExpression) -> Result<()> {
        if let Some(err) = self.scripted_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        let key = composite_from_item(&update.key);

        let item = entries.entry(key).or_insert_with(|| update.key.clone());

        // Apply "SET #a = :a, ..." clauses
        let expr = update.expression.as_str();
        if let Some(set_start) = expr.find("SET ") {
            let set_body = &expr[set_start + 4..];
            let set_body = match set_body.find(" REMOVE") {
                Some(end) => &set_body[..end],
                None => set_body,
            };
            for assignment in set_body.split(", ") {
                let Some((name_ref, value_ref)) = assignment.split_once(" = ") else {
                    continue;
                };
                let attr = update.names[name_ref.trim()].clone();
                let value = update
                    .values
                    .as_ref()
                    .and_then(|v| v.get(value_ref.trim()))
                    .cloned();
                if let Some(value) = value {
                    item.insert(attr, value);
                }
            }
        }

        // Apply "REMOVE #b, ..." clauses
        if let Some(remove_start) = expr.find("REMOVE ") {
            for name_ref in expr[remove_start + 7..].split(", ") {
                if let Some(attr) = update.names.get(name_ref.trim()) {
                    item.remove(attr);
                }
            }
        }

        Ok(())
    }
}

/// Gzip-compress a byte string
pub fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

pub fn s(v: &str) -> AttributeValue {
    AttributeValue::S(v.to_string())
}

pub fn n(v: &str) -> AttributeValue {
    AttributeValue::N(v.to_string())
}

/// A seeded table item with pk, sk, and a `number` attribute
pub fn table_item(pk: &str, sk: &str) -> Item {
    let mut item = Item::new();
    item.insert("pk".to_string(), s(pk));
    item.insert("sk".to_string(), s(sk));
    item.insert("number".to_string(), n("7"));
    item
}

/// FULL-export line for one item
pub fn full_line(pk: &str, sk: &str) -> String {
    format!(
        r#"{{"Item":{{"pk":{{"S":"{pk}"}},"sk":{{"S":"{sk}"}},"number":{{"N":"7"}}}}}}"#
    )
}

/// One data file of an export set
pub struct DataFile {
    pub name: String,
    pub lines: Vec<String>,
    pub compress: bool,
}

impl DataFile {
    pub fn gz(name: &str, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            lines,
            compress: true,
        }
    }

    pub fn plain(name: &str, lines: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            lines,
            compress: false,
        }
    }
}

/// Write a complete export set into the store; returns the manifest URI
pub fn seed_export(
    store: &MemoryObjectStore,
    export_type: &str,
    files: Vec<DataFile>,
) -> String {
    let mut manifest_lines = String::new();
    let mut total_items = 0usize;

    for file in &files {
        let key = format!("{EXPORT_PREFIX}/data/{}", file.name);
        let content = format!("{}\n", file.lines.join("\n"));
        let body = if file.compress {
            gzip(content.as_bytes())
        } else {
            content.into_bytes()
        };

        let md5_hex = compute_md5(&body);
        let md5_b64 = BASE64.encode(hex::decode(&md5_hex).unwrap());
        manifest_lines.push_str(&format!(
            "{{\"dataFileS3Key\":\"{key}\",\"etag\":\"{md5_hex}\",\"md5Checksum\":\"{md5_b64}\",\"itemCount\":{}}}\n",
            file.lines.len(),
        ));
        total_items += file.lines.len();
        store.insert(BUCKET, &key, body);
    }

    let files_key = format!("{EXPORT_PREFIX}/manifest-files.json");
    store.insert(BUCKET, &files_key, manifest_lines.into_bytes());

    let summary = format!(
        r#"{{
            "version": "2023-08-01",
            "exportArn": "arn:aws:dynamodb:us-west-2:123456789012:table/source/export/01768385930622",
            "s3Bucket": "{BUCKET}",
            "s3Prefix": "{EXPORT_PREFIX}",
            "manifestFilesS3Key": "{files_key}",
            "itemCount": {total_items},
            "outputFormat": "DYNAMODB_JSON",
            "outputView": "NEW_AND_OLD_IMAGES",
            "exportType": "{export_type}"
        }}"#
    );
    let summary_key = format!("{EXPORT_PREFIX}/manifest-summary.json");
    store.insert(BUCKET, &summary_key, summary.into_bytes());

    format!("s3://{BUCKET}/{summary_key}")
}
