use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{CacheEntry, CacheIndexEntry, RunRecord, RunStatus, Storage, StoredCheckpoint};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database for tests
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                StorageError::Connection {
                    message: format!("Invalid database URL: {}", e),
                }
            })?;

        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_checkpoint(&self, checkpoint: &StoredCheckpoint) -> StorageResult<()> {
        let payload = serde_json::to_string(&checkpoint.payload)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (name, version, payload, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                payload = excluded.payload,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(&checkpoint.name)
        .bind(&checkpoint.version)
        .bind(&payload)
        .bind(checkpoint.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_checkpoint(&self, name: &str) -> StorageResult<Option<StoredCheckpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT name, version, payload, saved_at
            FROM checkpoints
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCheckpoint::try_from).transpose()
    }

    async fn delete_checkpoint(&self, name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO source_cache (cache_key, url, content, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.cache_key)
        .bind(&entry.url)
        .bind(&entry.content)
        .bind(entry.size_bytes)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_cache_entry(&self, cache_key: &str) -> StorageResult<Option<CacheEntry>> {
        let row: Option<CacheEntryRow> = sqlx::query_as(
            r#"
            SELECT cache_key, url, content, size_bytes, created_at
            FROM source_cache
            WHERE cache_key = ?
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn delete_cache_entry(&self, cache_key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM source_cache WHERE cache_key = ?")
            .bind(cache_key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_cache_index(&self) -> StorageResult<Vec<CacheIndexEntry>> {
        let rows: Vec<CacheIndexRow> = sqlx::query_as(
            r#"
            SELECT cache_key, url, size_bytes, created_at
            FROM source_cache
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete_all_cache_entries(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM source_cache")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn save_run(&self, run: &RunRecord) -> StorageResult<()> {
        let metrics = run
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs (id, prompt, status, metrics, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.prompt)
        .bind(run.status.as_str())
        .bind(&metrics)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, id: &str) -> StorageResult<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, prompt, status, metrics, started_at, finished_at
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, prompt, status, metrics, started_at, finished_at
            FROM runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

/// Parse a stored RFC 3339 timestamp. Unreadable values map to the Unix
/// epoch so that cache entries carrying them count as expired.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(value, error = %e, "Unreadable stored timestamp, using epoch");
            DateTime::UNIX_EPOCH
        })
}

// Row types for SQLx

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    name: String,
    version: String,
    payload: String,
    saved_at: String,
}

impl TryFrom<CheckpointRow> for StoredCheckpoint {
    type Error = StorageError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Self {
            payload: serde_json::from_str(&row.payload)?,
            name: row.name,
            version: row.version,
            saved_at: parse_timestamp(&row.saved_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct CacheEntryRow {
    cache_key: String,
    url: String,
    content: String,
    size_bytes: i64,
    created_at: String,
}

impl From<CacheEntryRow> for CacheEntry {
    fn from(row: CacheEntryRow) -> Self {
        Self {
            cache_key: row.cache_key,
            url: row.url,
            content: row.content,
            size_bytes: row.size_bytes,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CacheIndexRow {
    cache_key: String,
    url: String,
    size_bytes: i64,
    created_at: String,
}

impl From<CacheIndexRow> for CacheIndexEntry {
    fn from(row: CacheIndexRow) -> Self {
        Self {
            cache_key: row.cache_key,
            url: row.url,
            size_bytes: row.size_bytes,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    prompt: String,
    status: String,
    metrics: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        let status = RunStatus::from_str(&row.status).unwrap_or_else(|e| {
            warn!(run_id = %row.id, error = %e, "Unreadable run status");
            RunStatus::Failed
        });

        Self {
            id: row.id,
            prompt: row.prompt,
            status,
            metrics: row.metrics.and_then(|s| serde_json::from_str(&s).ok()),
            started_at: parse_timestamp(&row.started_at),
            finished_at: row.finished_at.as_deref().map(parse_timestamp),
        }
    }
}
