//! Persistence of scored records.
//!
//! The scheduler only needs `save` and `list`; everything else (queries,
//! summaries, retention) lives behind downstream APIs. Two implementations
//! ship here: an append-only JSON Lines file for real runs and an in-memory
//! store for tests and one-off scans.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::errors::{EdgeScoutError, Result};
use crate::prober::Measurement;

/// A scored measurement ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub score: f64,
    pub grade: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    pub components: BTreeMap<String, f64>,
    pub measurement: Measurement,
}

/// Persists and retrieves measurement records.
///
/// `save` must be durable or at least ordered; duplicates across scans are
/// permitted.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save(&self, cancel: &CancellationToken, record: Record) -> Result<()>;
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Record>>;
}

/// Appends records to a JSON Lines file and can read them back.
pub struct JsonlStore {
    path: PathBuf,
    // serializes writers so concurrent saves cannot interleave lines
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlStore {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl Store for JsonlStore {
    async fn save(&self, cancel: &CancellationToken, record: Record) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EdgeScoutError::Cancelled);
        }
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Record>> {
        if cancel.is_cancelled() {
            return Err(EdgeScoutError::Cancelled);
        }
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            // a store nobody has written to yet is just empty
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if cancel.is_cancelled() {
                return Err(EdgeScoutError::Cancelled);
            }
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

/// Keeps records in memory; used by tests and one-off scans.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, cancel: &CancellationToken, record: Record) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EdgeScoutError::Cancelled);
        }
        self.records
            .lock()
            .expect("memory store mutex poisoned")
            .push(record);
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Record>> {
        if cancel.is_cancelled() {
            return Err(EdgeScoutError::Cancelled);
        }
        Ok(self
            .records
            .lock()
            .expect("memory store mutex poisoned")
            .clone())
    }
}
