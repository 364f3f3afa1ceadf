//! Resumable checkpoint persistence
//!
//! The restore keeps exactly one durable record: the file being processed
//! and the byte offset of the last batch committed from it. On restart the
//! coordinator skips files before `last_file` and the owning worker resumes
//! inside it. A `last_byte_offset` of [`COMPLETED_OFFSET`] marks the file
//! fully processed.
//!
//! Three backends: in-memory (default, no durability), local file
//! (`file://`), and object store (`s3://`). Saves are last-write-wins; the
//! record is small and each worker only checkpoints its own file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use ddbr_common::s3uri::parse_file_uri;
use ddbr_common::{RestoreError, Result, S3Uri};

use crate::storage::ObjectStore;

/// Sentinel offset marking a file as fully processed
pub const COMPLETED_OFFSET: i64 = -1;

/// The single persisted checkpoint record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointState {
    pub export_id: String,
    pub last_file: String,
    pub last_byte_offset: i64,
}

impl CheckpointState {
    /// Checkpoint at a byte offset within a file
    pub fn at(file: &str, offset: i64) -> Self {
        Self {
            export_id: file.to_string(),
            last_file: file.to_string(),
            last_byte_offset: offset,
        }
    }

    /// Completion checkpoint for a file
    pub fn completed(file: &str) -> Self {
        Self::at(file, COMPLETED_OFFSET)
    }

    /// True when this state marks its file fully processed
    pub fn is_completed(&self) -> bool {
        self.last_byte_offset == COMPLETED_OFFSET
    }
}

/// Contract for loading and saving checkpoint state
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the current state; a store with no record yet returns the zero
    /// state
    async fn load(&self) -> Result<CheckpointState>;

    /// Overwrite the stored state
    async fn save(&self, state: &CheckpointState) -> Result<()>;
}

/// In-memory store, used when no resume URI is configured
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<CheckpointState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self) -> Result<CheckpointState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &CheckpointState) -> Result<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }
}

/// Local-file store backed by a `file://` URI
pub struct FileStore {
    path: PathBuf,
    // Serializes concurrent saves from multiple workers
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store from a `file:///absolute/path` URI
    ///
    /// Parent directories are created here so the first save cannot fail on
    /// a missing directory mid-restore.
    pub fn new(uri: &str) -> Result<Self> {
        let path = parse_file_uri(uri)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn load(&self) -> Result<CheckpointState> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &CheckpointState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let data = serde_json::to_vec(state)?;

        // Write-then-rename keeps the record intact if the process dies
        // mid-save.
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Object-store checkpoint backed by an `s3://` URI
pub struct S3Store {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
}

impl S3Store {
    pub fn new(store: Arc<dyn ObjectStore>, uri: &str) -> Result<Self> {
        let uri = S3Uri::parse(uri)?;
        Ok(Self {
            store,
            bucket: uri.bucket,
            key: uri.key,
        })
    }
}

#[async_trait]
impl CheckpointStore for S3Store {
    async fn load(&self) -> Result<CheckpointState> {
        match self.store.get(&self.bucket, &self.key).await? {
            Some(data) => serde_json::from_slice(&data).map_err(|e| {
                RestoreError::fatal_io(format!(
                    "checkpoint object s3://{}/{} is not valid JSON: {e}",
                    self.bucket, self.key
                ))
            }),
            None => Ok(CheckpointState::default()),
        }
    }

    async fn save(&self, state: &CheckpointState) -> Result<()> {
        let data = serde_json::to_vec(state)?;
        self.store.put(&self.bucket, &self.key, data).await
    }
}
