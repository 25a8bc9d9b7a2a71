//! Checkpoint store: one resumable snapshot of a research run.
//!
//! Snapshots are written as a single row upsert, so a save either replaces the
//! previous snapshot entirely or leaves it untouched. Saves are serialized and
//! the snapshot is built while holding the write lock, which keeps a slow
//! writer from replacing a newer snapshot with an older one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::StorageResult;
use crate::research::{Fact, Plan};
use crate::storage::{SqliteStorage, Storage, StoredCheckpoint};

/// Format version written with every snapshot.
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub user_prompt: String,
    pub plan: Plan,
    /// Last step number reached; 0 right after planning.
    pub current_step: u32,
    /// Step numbers that finished their convergence loop.
    pub completed_steps: Vec<u32>,
    pub all_facts: Vec<Fact>,
    /// Sorted for a stable on-disk form.
    pub scraped_urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointState {
    /// Create a snapshot stamped with the current time
    pub fn new(user_prompt: impl Into<String>, plan: Plan) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            plan,
            current_step: 0,
            completed_steps: Vec::new(),
            all_facts: Vec::new(),
            scraped_urls: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Human-readable view of a stored checkpoint
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub prompt_preview: String,
    pub timestamp: DateTime<Utc>,
    pub current_step: u32,
    pub completed_steps: Vec<u32>,
    pub fact_count: usize,
    pub url_count: usize,
    pub version: String,
}

impl std::fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Prompt: {}", self.prompt_preview)?;
        writeln!(f, "Timestamp: {}", self.timestamp.to_rfc3339())?;
        writeln!(f, "Current Step: {}", self.current_step)?;
        writeln!(f, "Completed Steps: {:?}", self.completed_steps)?;
        writeln!(f, "Facts Collected: {}", self.fact_count)?;
        write!(f, "URLs Scraped: {}", self.url_count)
    }
}

/// Named checkpoint slot in SQLite
pub struct CheckpointStore {
    storage: SqliteStorage,
    name: String,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Create a store for the checkpoint called `name`
    pub fn new(storage: SqliteStorage, name: impl Into<String>) -> Self {
        Self {
            storage,
            name: name.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Checkpoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist `state`, replacing any previous snapshot.
    pub async fn save(&self, state: &CheckpointState) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(state).await
    }

    /// Build the snapshot under the write lock, then persist it.
    pub async fn save_with<F>(&self, build: F) -> StorageResult<CheckpointState>
    where
        F: FnOnce() -> CheckpointState,
    {
        let _guard = self.write_lock.lock().await;
        let state = build();
        self.write(&state).await?;
        Ok(state)
    }

    async fn write(&self, state: &CheckpointState) -> StorageResult<()> {
        let payload = serde_json::to_value(state)?;
        let checkpoint = StoredCheckpoint::new(&self.name, CHECKPOINT_VERSION, payload);
        self.storage.upsert_checkpoint(&checkpoint).await?;

        info!(
            checkpoint = %self.name,
            step = state.current_step,
            facts = state.all_facts.len(),
            urls = state.scraped_urls.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Last saved snapshot, if any.
    ///
    /// An unreadable snapshot is logged and treated as absent.
    pub async fn load(&self) -> StorageResult<Option<CheckpointState>> {
        let Some(stored) = self.storage.get_checkpoint(&self.name).await? else {
            return Ok(None);
        };

        if stored.version != CHECKPOINT_VERSION {
            warn!(
                checkpoint = %self.name,
                version = %stored.version,
                expected = CHECKPOINT_VERSION,
                "Checkpoint version differs, attempting to load anyway"
            );
        }

        match serde_json::from_value::<CheckpointState>(stored.payload) {
            Ok(state) => {
                info!(
                    checkpoint = %self.name,
                    saved_at = %stored.saved_at.to_rfc3339(),
                    "Checkpoint found"
                );
                Ok(Some(state))
            }
            Err(e) => {
                warn!(checkpoint = %self.name, error = %e, "Unreadable checkpoint ignored");
                Ok(None)
            }
        }
    }

    /// Remove the snapshot. Returns whether one existed.
    pub async fn clear(&self) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.storage.delete_checkpoint(&self.name).await?;
        if removed {
            info!(checkpoint = %self.name, "Checkpoint cleared");
        }
        Ok(removed)
    }

    /// Whether a snapshot is stored.
    pub async fn exists(&self) -> StorageResult<bool> {
        Ok(self.storage.get_checkpoint(&self.name).await?.is_some())
    }

    /// Summary of the stored snapshot, if any.
    pub async fn summary(&self) -> StorageResult<Option<CheckpointSummary>> {
        let Some(stored) = self.storage.get_checkpoint(&self.name).await? else {
            return Ok(None);
        };
        let version = stored.version.clone();
        let Ok(state) = serde_json::from_value::<CheckpointState>(stored.payload) else {
            return Ok(None);
        };

        Ok(Some(CheckpointSummary {
            prompt_preview: preview(&state.user_prompt, 100),
            timestamp: state.timestamp,
            current_step: state.current_step,
            completed_steps: state.completed_steps,
            fact_count: state.all_facts.len(),
            url_count: state.scraped_urls.len(),
            version,
        }))
    }
}

/// First `max_chars` characters, with an ellipsis when cut.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
