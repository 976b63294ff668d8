//! Storage layer for relayprobe-relay.
//!
//! Nodes are stored whole, keyed by soul (the slash-joined path), as JSON
//! including their metadata. Merging happens in the relay before `save`.

mod memory;
mod sqlite;

pub use memory::MemoryGraph;
pub use sqlite::SqliteGraph;

use crate::config::StorageConfig;
use crate::error::StorageResult;
use async_trait::async_trait;
use relayprobe_types::NodePath;
use serde_json::Value;
use std::sync::Arc;

/// Trait for graph storage backends.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    /// Load the current value of a node.
    async fn load(&self, path: &NodePath) -> StorageResult<Option<Value>>;

    /// Replace the stored value of a node.
    async fn save(&self, path: &NodePath, value: &Value) -> StorageResult<()>;

    /// Number of stored nodes.
    async fn node_count(&self) -> StorageResult<u64>;

    /// Backend name for logs.
    fn kind(&self) -> &'static str;
}

/// Open the backend selected by `config`.
///
/// SQLite at `config.path` when enabled, otherwise process memory.
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn GraphStorage>> {
    if config.enabled {
        let storage = SqliteGraph::new(&config.path).await?;
        tracing::info!("Storage: SQLite at {}", config.path.display());
        Ok(Arc::new(storage))
    } else {
        tracing::info!("Storage: in-memory (persistence disabled)");
        Ok(Arc::new(MemoryGraph::new()))
    }
}
