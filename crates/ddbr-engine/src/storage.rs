//! Object storage abstraction
//!
//! The engine talks to the object store through the [`ObjectStore`] trait so
//! the S3 client can be swapped for an in-memory fake in tests. The contract
//! is deliberately small: whole-object get/put, metadata head, and a ranged
//! streaming read for the line streamer. Missing objects are `Ok(None)`
//! rather than errors, because both the checkpoint store and the manifest
//! loader need to tell "absent" apart from "failed".

use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

use ddbr_common::checksum::compute_md5;
use ddbr_common::{RestoreError, Result};

/// Streaming object body
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata of a stored object
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Entity tag as returned by the store, quotes included
    pub etag: Option<String>,
    /// Object size in bytes
    pub size: i64,
}

/// Storage backend contract
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a whole object; `Ok(None)` when the key does not exist
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite an object
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Fetch object metadata; `Ok(None)` when the key does not exist
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>>;

    /// Open a streaming read starting at `start_offset` bytes into the object
    async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
        start_offset: u64,
    ) -> Result<Option<ObjectReader>>;
}

/// S3 implementation of [`ObjectStore`]
#[derive(Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

/// True when a service error message indicates a missing key on an
/// S3-compatible store that does not return the typed NoSuchKey error.
fn looks_like_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404")
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => {
                let data = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| {
                        RestoreError::transient(format!(
                            "failed to read body of s3://{bucket}/{key}: {e}"
                        ))
                    })?
                    .into_bytes()
                    .to_vec();
                debug!("Fetched {} bytes from s3://{}/{}", data.len(), bucket, key);
                Ok(Some(data))
            },
            Err(err) => {
                let svc = err.into_service_error();
                if svc.is_no_such_key() || looks_like_not_found(&svc.to_string()) {
                    Ok(None)
                } else {
                    Err(RestoreError::transient(format!(
                        "failed to get s3://{bucket}/{key}: {svc}"
                    )))
                }
            },
        }
    }

    #[instrument(skip(self, body))]
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                RestoreError::transient(format!("failed to put s3://{bucket}/{key}: {e}"))
            })?;
        debug!("Uploaded {} bytes to s3://{}/{}", size, bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(ObjectMeta {
                etag: resp.e_tag().map(|s| s.to_string()),
                size: resp.content_length().unwrap_or(0),
            })),
            Err(err) => {
                let svc = err.into_service_error();
                if svc.is_not_found() || looks_like_not_found(&svc.to_string()) {
                    Ok(None)
                } else {
                    Err(RestoreError::transient(format!(
                        "failed to head s3://{bucket}/{key}: {svc}"
                    )))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
        start_offset: u64,
    ) -> Result<Option<ObjectReader>> {
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if start_offset > 0 {
            req = req.range(format!("bytes={start_offset}-"));
        }

        match req.send().await {
            Ok(resp) => {
                let reader: ObjectReader = Box::pin(resp.body.into_async_read());
                Ok(Some(reader))
            },
            Err(err) => {
                let svc = err.into_service_error();
                if svc.is_no_such_key() || looks_like_not_found(&svc.to_string()) {
                    Ok(None)
                } else {
                    Err(RestoreError::transient(format!(
                        "failed to open s3://{bucket}/{key} at offset {start_offset}: {svc}"
                    )))
                }
            },
        }
    }
}

/// In-memory implementation of [`ObjectStore`]
///
/// Backs tests and local experiments. The reported ETag is the quoted hex
/// MD5 of the body, matching what S3 returns for single-part uploads.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_key(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Seed an object outside the trait, for test setup
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(Self::object_key(bucket, key), body);
        }
    }

    fn read_locked(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .read()
            .map_err(|_| RestoreError::fatal_io("object store lock poisoned"))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.read_locked()?;
        Ok(objects.get(&Self::object_key(bucket, key)).cloned())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| RestoreError::fatal_io("object store lock poisoned"))?;
        objects.insert(Self::object_key(bucket, key), body);
        Ok(())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.read_locked()?;
        Ok(objects.get(&Self::object_key(bucket, key)).map(|body| ObjectMeta {
            etag: Some(format!("\"{}\"", compute_md5(body))),
            size: body.len() as i64,
        }))
    }

    async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
        start_offset: u64,
    ) -> Result<Option<ObjectReader>> {
        let objects = self.read_locked()?;
        let Some(body) = objects.get(&Self::object_key(bucket, key)) else {
            return Ok(None);
        };
        let start = (start_offset as usize).min(body.len());
        let reader: ObjectReader = Box::pin(Cursor::new(body[start..].to_vec()));
        Ok(Some(reader))
    }
}
