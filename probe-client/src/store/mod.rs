//! Graph store abstraction.
//!
//! The store is path-addressed and push-based: `get("test").next("data")`
//! yields a node handle, listeners registered with `on` receive every value
//! written after registration, and `put` reports its outcome through an ack
//! callback.
//!
//! # Design
//!
//! The node API is callback-driven and synchronous on purpose: it mirrors the
//! reactive store it fronts. [`SyncProbe`](crate::SyncProbe) turns these
//! callbacks into bounded futures.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let node = store.get("test").next("data");
//! let handle = node.on(Arc::new(|value| println!("{value}")))?;
//! node.put(json!({ "message": "hi" }), Box::new(|ack| println!("{ack}")))?;
//! ```

mod memory;
mod relay;

pub use memory::{MemoryNode, MemoryStore};
pub use relay::{RelayNode, RelayStore, RelayStoreConfig};

use relayprobe_types::{Ack, NodePath, WireError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the store failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The store connection is closed.
    #[error("store connection closed")]
    Closed,

    /// Connecting or a request took too long.
    #[error("store request timed out")]
    Timeout,

    /// Frame encoding or decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Deregistering a listener failed.
    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),

    /// The store refused the request before sending it.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A subscription callback. Receives the node's value (with metadata), or
/// `Value::Null` when the node is absent.
pub type Listener = Arc<dyn Fn(Value) + Send + Sync>;

/// Receives the store's acknowledgement for a single put.
pub type AckCallback = Box<dyn FnOnce(Ack) + Send>;

/// Unsubscribe capability returned by [`GraphNode::on`].
pub type Unsubscribe = Box<dyn FnOnce() -> Result<(), StoreError> + Send>;

/// Whether two listener handles refer to the same callback.
pub fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// A handle to one node of the graph.
pub trait GraphNode: Clone + Send + Sync + 'static {
    /// The address of this node.
    fn path(&self) -> &NodePath;

    /// Handle to a child node.
    fn next(&self, key: &str) -> Self;

    /// Register a listener for values written to this node.
    ///
    /// Some stores return an unsubscribe handle; others expect the caller
    /// to deregister through [`off`](Self::off).
    fn on(&self, listener: Listener) -> Result<Option<Unsubscribe>, StoreError>;

    /// Deregister a listener previously passed to [`on`](Self::on).
    fn off(&self, listener: &Listener) -> Result<(), StoreError>;

    /// Write a value. `ack` is called at most once.
    fn put(&self, value: Value, ack: AckCallback) -> Result<(), StoreError>;
}

/// Entry point of a graph store.
pub trait GraphStore: Send + Sync {
    /// Node handle type.
    type Node: GraphNode;

    /// Handle to a top-level node.
    fn get(&self, key: &str) -> Self::Node;

    /// Whether the store can currently serve requests.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Resolve a full path to a node handle.
pub fn node_at<S: GraphStore>(store: &S, path: &NodePath) -> Option<S::Node> {
    let (first, rest) = path.segments().split_first()?;
    let mut node = store.get(first);
    for key in rest {
        node = node.next(key);
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_listener_compares_identity() {
        let a: Listener = Arc::new(|_: Value| {});
        let b: Listener = Arc::new(|_: Value| {});
        let a2 = a.clone();

        assert!(same_listener(&a, &a2));
        assert!(!same_listener(&a, &b));
    }

    #[test]
    fn node_at_walks_segments() {
        let store = MemoryStore::new();
        let path = NodePath::root("test").child("data");
        let node = node_at(&store, &path).unwrap();
        assert_eq!(node.path(), &path);
    }

    #[test]
    fn store_error_display() {
        assert_eq!(StoreError::Closed.to_string(), "store connection closed");
        assert_eq!(
            StoreError::Unsubscribe("gone".into()).to_string(),
            "unsubscribe failed: gone"
        );
    }
}
