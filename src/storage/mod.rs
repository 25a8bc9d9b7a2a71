//! Storage layer for checkpoints, cached sources and run records.
//!
//! This module provides SQLite-based persistence shared by the checkpoint
//! store, the source cache and the research engine.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// A named snapshot of run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Checkpoint name, unique.
    pub name: String,
    /// Format version of the payload.
    pub version: String,
    /// Serialized run state.
    pub payload: serde_json::Value,
    /// When the snapshot was written.
    pub saved_at: DateTime<Utc>,
}

/// Cached extracted text for one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of the URL.
    pub cache_key: String,
    pub url: String,
    pub content: String,
    /// UTF-8 byte length of `content`.
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Cache index row without the content body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndexEntry {
    pub cache_key: String,
    pub url: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// A persisted research run with its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub prompt: String,
    pub status: RunStatus,
    pub metrics: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StoredCheckpoint {
    /// Create a checkpoint stamped with the current time
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            payload,
            saved_at: Utc::now(),
        }
    }
}

impl CacheEntry {
    /// Create a cache entry; the size is derived from the content
    pub fn new(
        cache_key: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            cache_key: cache_key.into(),
            url: url.into(),
            size_bytes: content.len() as i64,
            content,
            created_at: Utc::now(),
        }
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Index view of this entry
    pub fn index(&self) -> CacheIndexEntry {
        CacheIndexEntry {
            cache_key: self.cache_key.clone(),
            url: self.url.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
        }
    }
}

impl RunRecord {
    /// Start a new run record
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            status: RunStatus::Running,
            metrics: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark the run finished with the given status and metrics
    pub fn finish(mut self, status: RunStatus, metrics: serde_json::Value) -> Self {
        self.status = status;
        self.metrics = Some(metrics);
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Storage trait for persistence backends
#[async_trait]
pub trait Storage: Send + Sync {
    // Checkpoint operations

    /// Insert or replace the checkpoint with the same name.
    async fn upsert_checkpoint(&self, checkpoint: &StoredCheckpoint) -> StorageResult<()>;
    /// Get a checkpoint by name.
    async fn get_checkpoint(&self, name: &str) -> StorageResult<Option<StoredCheckpoint>>;
    /// Delete a checkpoint. Returns whether a row was removed.
    async fn delete_checkpoint(&self, name: &str) -> StorageResult<bool>;

    // Source cache operations

    /// Insert or replace a cache entry.
    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()>;
    /// Get a cache entry by key.
    async fn get_cache_entry(&self, cache_key: &str) -> StorageResult<Option<CacheEntry>>;
    /// Delete a cache entry. Returns whether a row was removed.
    async fn delete_cache_entry(&self, cache_key: &str) -> StorageResult<bool>;
    /// List the cache index, oldest first.
    async fn list_cache_index(&self) -> StorageResult<Vec<CacheIndexEntry>>;
    /// Delete every cache entry. Returns the number removed.
    async fn delete_all_cache_entries(&self) -> StorageResult<u64>;

    // Run operations

    /// Insert or replace a run record.
    async fn save_run(&self, run: &RunRecord) -> StorageResult<()>;
    /// Get a run by ID.
    async fn get_run(&self, id: &str) -> StorageResult<Option<RunRecord>>;
    /// Most recent runs first.
    async fn list_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>>;
}
