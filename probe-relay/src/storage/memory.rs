//! In-memory storage backend, used when persistence is disabled.

use super::GraphStorage;
use crate::error::StorageResult;
use async_trait::async_trait;
use dashmap::DashMap;
use relayprobe_types::NodePath;
use serde_json::Value;

/// Process-memory node storage. Contents are lost on shutdown.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: DashMap<NodePath, Value>,
}

impl MemoryGraph {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStorage for MemoryGraph {
    async fn load(&self, path: &NodePath) -> StorageResult<Option<Value>> {
        Ok(self.nodes.get(path).map(|entry| entry.value().clone()))
    }

    async fn save(&self, path: &NodePath, value: &Value) -> StorageResult<()> {
        self.nodes.insert(path.clone(), value.clone());
        Ok(())
    }

    async fn node_count(&self) -> StorageResult<u64> {
        Ok(self.nodes.len() as u64)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
