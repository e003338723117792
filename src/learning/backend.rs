//! Durable storage for learning records
//!
//! The store only needs two operations from storage: append one record and
//! read back the most recent ones. `compact` rewrites the whole history so
//! append-only files stay bounded.

use super::records::LearningRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Learning persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage collaborator consumed by the learning store
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Append a single record
    async fn append(&self, record: &LearningRecord) -> Result<(), PersistenceError>;

    /// Read up to `limit` most recent records, oldest first
    async fn read_recent(&self, limit: usize) -> Result<Vec<LearningRecord>, PersistenceError>;

    /// Replace stored history with exactly `records`
    async fn compact(&self, records: &[LearningRecord]) -> Result<(), PersistenceError>;
}

/// One JSON object per line, one file per user
pub struct JsonlFileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileBackend {
    /// Backend storing `<dir>/learning-<encoded user_id>.jsonl`
    pub fn new(dir: impl AsRef<Path>, user_id: &str) -> Self {
        let path = dir
            .as_ref()
            .join(format!("learning-{}.jsonl", file_safe(user_id)));
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Encode a user id as a file-name fragment
///
/// Lowercase ASCII letters, digits and `-` pass through; every other byte
/// becomes `_xx` (lowercase hex). The mapping is injective, so distinct ids
/// never share a file, even on case-insensitive filesystems.
fn file_safe(user_id: &str) -> String {
    let mut encoded = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

#[async_trait]
impl PersistenceBackend for JsonlFileBackend {
    fn name(&self) -> &str {
        "jsonl-file"
    }

    async fn append(&self, record: &LearningRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<LearningRecord>, PersistenceError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LearningRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed learning record"
                ),
            }
        }

        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }

    async fn compact(&self, records: &[LearningRecord]) -> Result<(), PersistenceError> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), records = records.len(), "Compacted learning file");
        Ok(())
    }
}

/// Volatile backend, useful when durability is not configured
#[derive(Default)]
pub struct InMemoryBackend {
    records: Mutex<Vec<LearningRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn append(&self, record: &LearningRecord) -> Result<(), PersistenceError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<LearningRecord>, PersistenceError> {
        let records = self.records.lock().await;
        let skip = records.len().saturating_sub(limit);
        Ok(records.iter().skip(skip).cloned().collect())
    }

    async fn compact(&self, records: &[LearningRecord]) -> Result<(), PersistenceError> {
        *self.records.lock().await = records.to_vec();
        Ok(())
    }
}
