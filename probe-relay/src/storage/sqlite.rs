//! SQLite storage backend for relayprobe-relay.

use super::GraphStorage;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use relayprobe_types::NodePath;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based node storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteGraph {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraph")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteGraph {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let url = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A second connection would open a separate in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                soul TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl GraphStorage for SqliteGraph {
    async fn load(&self, path: &NodePath) -> StorageResult<Option<Value>> {
        let row: Option<String> = sqlx::query_scalar("SELECT value FROM nodes WHERE soul = ?1")
            .bind(path.soul())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        match row {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, path: &NodePath, value: &Value) -> StorageResult<()> {
        let text = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO nodes (soul, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(soul) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(path.soul())
        .bind(text)
        .bind(Self::current_timestamp_ms())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn node_count(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(count as u64)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }
}
