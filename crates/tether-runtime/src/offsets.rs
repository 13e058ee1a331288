//! Offset stores
//!
//! An offset store keeps the latest committed [`PositionIndex`] per connector
//! identity. Physically it is an append log of [`CommitRecord`]s, compacted on
//! read: the last record for an identity wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use tether_core::{OffsetStoreConfig, PositionIndex};

use crate::error::{Error, Result};

/// One durable commit of a connector's position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Connector identity
    pub connector: String,

    /// Committed resume point
    pub index: PositionIndex,

    /// Time of the commit
    pub committed_at: DateTime<Utc>,
}

impl CommitRecord {
    /// Create a commit record stamped with the current time
    pub fn now(connector: impl Into<String>, index: PositionIndex) -> Self {
        Self {
            connector: connector.into(),
            index,
            committed_at: Utc::now(),
        }
    }
}

/// Trait for durable position storage shared between connectors
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Most recent committed position for `connector`, if it ever committed
    async fn read_last(&self, connector: &str) -> Result<Option<PositionIndex>>;

    /// Durably record `index` as the resume point for `connector`.
    ///
    /// Committing the current latest index again is a no-op.
    async fn commit(&self, connector: &str, index: &PositionIndex) -> Result<()>;
}

/// Build the configured offset store
pub fn build_offset_store(config: &OffsetStoreConfig) -> Arc<dyn OffsetStore> {
    match config {
        OffsetStoreConfig::File { path } => Arc::new(FileOffsetStore::new(path)),
        OffsetStoreConfig::Memory => Arc::new(MemoryOffsetStore::new()),
    }
}

// ============================================================================
// File Offset Store
// ============================================================================

/// Offset store backed by an append-only JSON-lines log file
pub struct FileOffsetStore {
    path: PathBuf,
    state: tokio::sync::Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    writer: Option<tokio::fs::File>,
    latest: HashMap<String, PositionIndex>,
}

impl FileOffsetStore {
    /// Create a store writing to `path`. The file is created on first commit.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: tokio::sync::Mutex::new(FileState::default()),
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest commit per connector, compacted from the whole log
    pub async fn latest_commits(&self) -> Result<BTreeMap<String, CommitRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::OffsetRead {
                    connector: "*".to_string(),
                    message: format!("{}: {e}", self.path.display()),
                });
            }
        };

        let mut latest = BTreeMap::new();
        let total = contents.lines().count();
        // only an unterminated last line can be a torn append
        let torn_tail = !contents.is_empty() && !contents.ends_with('\n');
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CommitRecord>(line) {
                Ok(record) => {
                    latest.insert(record.connector.clone(), record);
                }
                Err(e) if torn_tail && number + 1 == total => {
                    // torn write from a crash mid-append
                    tracing::warn!(
                        path = %self.path.display(),
                        "Ignoring incomplete trailing commit record: {}",
                        e
                    );
                }
                Err(e) => {
                    return Err(Error::OffsetRead {
                        connector: "*".to_string(),
                        message: format!("corrupt commit log line {}: {e}", number + 1),
                    });
                }
            }
        }
        Ok(latest)
    }

    async fn open_writer(&self) -> std::io::Result<tokio::fs::File> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        // drop a torn trailing record so the next one starts on a clean line
        let contents = tokio::fs::read(&self.path).await?;
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            let keep = contents
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |i| i + 1);
            tracing::warn!(
                path = %self.path.display(),
                "Truncating {} bytes of incomplete commit record",
                contents.len() - keep
            );
            file.set_len(keep as u64).await?;
        }
        Ok(file)
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn read_last(&self, connector: &str) -> Result<Option<PositionIndex>> {
        let latest = self.latest_commits().await.map_err(|e| match e {
            Error::OffsetRead { message, .. } => Error::OffsetRead {
                connector: connector.to_string(),
                message,
            },
            other => other,
        })?;
        let index = latest.get(connector).map(|r| r.index.clone());

        let mut state = self.state.lock().await;
        match &index {
            Some(index) => state.latest.insert(connector.to_string(), index.clone()),
            None => state.latest.remove(connector),
        };
        Ok(index)
    }

    async fn commit(&self, connector: &str, index: &PositionIndex) -> Result<()> {
        let commit_err = |e: std::io::Error| Error::Commit {
            connector: connector.to_string(),
            message: e.to_string(),
        };

        let mut state = self.state.lock().await;
        if state.latest.get(connector) == Some(index) {
            tracing::debug!(connector, %index, "Position already committed");
            return Ok(());
        }

        let mut line = serde_json::to_vec(&CommitRecord::now(connector, index.clone()))?;
        line.push(b'\n');

        // a failed append drops the handle; reopening repairs a torn line
        let mut writer = match state.writer.take() {
            Some(writer) => writer,
            None => self.open_writer().await.map_err(commit_err)?,
        };
        append_line(&mut writer, &line).await.map_err(commit_err)?;
        state.writer = Some(writer);

        state.latest.insert(connector.to_string(), index.clone());
        Ok(())
    }
}

async fn append_line(file: &mut tokio::fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

// ============================================================================
// Memory Offset Store
// ============================================================================

/// Offset store kept in process memory.
///
/// Clones share the same history, so one instance can outlive the connectors
/// that use it (restart simulations in tests).
#[derive(Debug, Clone, Default)]
pub struct MemoryOffsetStore {
    history: Arc<Mutex<HashMap<String, Vec<CommitRecord>>>>,
}

impl MemoryOffsetStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit appended for `connector`, oldest first
    pub fn history(&self, connector: &str) -> Vec<CommitRecord> {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.get(connector).cloned())
            .unwrap_or_default()
    }

    fn poisoned(connector: &str) -> Error {
        Error::Commit {
            connector: connector.to_string(),
            message: "offset store lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn read_last(&self, connector: &str) -> Result<Option<PositionIndex>> {
        let history = self.history.lock().map_err(|_| Self::poisoned(connector))?;
        Ok(history
            .get(connector)
            .and_then(|commits| commits.last())
            .map(|record| record.index.clone()))
    }

    async fn commit(&self, connector: &str, index: &PositionIndex) -> Result<()> {
        let mut history = self.history.lock().map_err(|_| Self::poisoned(connector))?;
        let commits = history.entry(connector.to_string()).or_default();
        if commits.last().map(|r| &r.index) == Some(index) {
            return Ok(());
        }
        commits.push(CommitRecord::now(connector, index.clone()));
        Ok(())
    }
}
