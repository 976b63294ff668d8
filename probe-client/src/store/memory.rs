//! In-process graph store for testing.
//!
//! Delivery is pure push: a listener only sees writes made after it was
//! registered. Test controls allow failing, dropping, delaying, withholding
//! and duplicating deliveries.

use super::{same_listener, AckCallback, GraphNode, GraphStore, Listener, StoreError, Unsubscribe};
use relayprobe_types::{merge_put, Ack, NodePath};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// In-memory graph store.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// code under test owns another.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("nodes", &inner.nodes.len())
            .field("watched_paths", &inner.listeners.len())
            .field("held_acks", &inner.held_acks.len())
            .finish_non_exhaustive()
    }
}

struct Registration {
    id: u64,
    listener: Listener,
}

struct MemoryStoreInner {
    nodes: HashMap<NodePath, Value>,
    listeners: HashMap<NodePath, Vec<Registration>>,
    next_listener_id: u64,
    puts: Vec<(NodePath, Value)>,
    held_acks: Vec<AckCallback>,
    return_handles: bool,
    fail_next_put: Option<String>,
    fail_next_ack: Option<String>,
    fail_unsubscribe: Option<String>,
    hold_acks: bool,
    withhold_updates: bool,
    extra_deliveries: usize,
    delivery_delay: Option<Duration>,
    disconnected: bool,
}

impl Default for MemoryStoreInner {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            listeners: HashMap::new(),
            next_listener_id: 0,
            puts: Vec::new(),
            held_acks: Vec::new(),
            return_handles: true,
            fail_next_put: None,
            fail_next_ack: None,
            fail_unsubscribe: None,
            hold_acks: false,
            withhold_updates: false,
            extra_deliveries: 0,
            delivery_delay: None,
            disconnected: false,
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose whether `on` returns an unsubscribe handle (default: true).
    ///
    /// With `false`, callers must deregister through `off`.
    pub fn set_return_handles(&self, enabled: bool) {
        self.lock().return_handles = enabled;
    }

    /// Cause the next `put` call to fail synchronously.
    pub fn fail_next_put(&self, error: &str) {
        self.lock().fail_next_put = Some(error.to_string());
    }

    /// Acknowledge the next put with an error ack instead of storing it.
    pub fn fail_next_ack(&self, reason: &str) {
        self.lock().fail_next_ack = Some(reason.to_string());
    }

    /// Cause every deregistration to fail with the given error.
    pub fn fail_unsubscribe(&self, error: &str) {
        self.lock().fail_unsubscribe = Some(error.to_string());
    }

    /// Store puts but hold their ack callbacks without calling them.
    pub fn hold_acks(&self, enabled: bool) {
        self.lock().hold_acks = enabled;
    }

    /// Store puts but never notify listeners.
    pub fn withhold_updates(&self, enabled: bool) {
        self.lock().withhold_updates = enabled;
    }

    /// Deliver every update `extra` more times after the first delivery.
    pub fn duplicate_deliveries(&self, extra: usize) {
        self.lock().extra_deliveries = extra;
    }

    /// Deliver acks and updates from a background task after `delay`
    /// instead of inline. Requires a tokio runtime.
    pub fn set_delivery_delay(&self, delay: Option<Duration>) {
        self.lock().delivery_delay = delay;
    }

    /// Report the store as disconnected from `is_connected`.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.lock().disconnected = disconnected;
    }

    /// Current value of a node, including metadata.
    pub fn value_at(&self, path: &NodePath) -> Option<Value> {
        self.lock().nodes.get(path).cloned()
    }

    /// Number of listeners registered on a node.
    pub fn listener_count(&self, path: &NodePath) -> usize {
        self.lock().listeners.get(path).map_or(0, Vec::len)
    }

    /// Every accepted put, in order.
    pub fn puts(&self) -> Vec<(NodePath, Value)> {
        self.lock().puts.clone()
    }

    /// Push a value to the listeners of `path` without storing it.
    ///
    /// Simulates a peer relaying an update the store has not merged yet.
    pub fn emit(&self, path: &NodePath, value: Value) {
        let listeners = self.listeners_for(path);
        for listener in listeners {
            listener(value.clone());
        }
    }

    /// Clear all state and test controls.
    pub fn reset(&self) {
        *self.lock() = MemoryStoreInner::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners_for(&self, path: &NodePath) -> Vec<Listener> {
        self.lock()
            .listeners
            .get(path)
            .map(|regs| regs.iter().map(|r| r.listener.clone()).collect())
            .unwrap_or_default()
    }

    fn register(&self, path: &NodePath, listener: Listener) -> (u64, bool) {
        let mut inner = self.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner
            .listeners
            .entry(path.clone())
            .or_default()
            .push(Registration { id, listener });
        (id, inner.return_handles)
    }

    fn deregister(&self, path: &NodePath, matches: impl Fn(&Registration) -> bool) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_unsubscribe.clone() {
            return Err(StoreError::Unsubscribe(error));
        }
        if let Some(regs) = inner.listeners.get_mut(path) {
            regs.retain(|r| !matches(r));
            if regs.is_empty() {
                inner.listeners.remove(path);
            }
        }
        Ok(())
    }

    fn apply_put(&self, path: &NodePath, value: Value, ack: AckCallback) -> Result<(), StoreError> {
        let (ack, update, listeners, repeats, delay) = {
            let mut inner = self.lock();

            if let Some(error) = inner.fail_next_put.take() {
                return Err(StoreError::Rejected(error));
            }

            if let Some(reason) = inner.fail_next_ack.take() {
                let delay = inner.delivery_delay;
                drop(inner);
                deliver(delay, move || ack(Ack::error(&reason)));
                return Ok(());
            }

            let merged = merge_put(inner.nodes.get(path).cloned(), path, value.clone(), now_millis());
            inner.nodes.insert(path.clone(), merged.clone());
            inner.puts.push((path.clone(), value));

            let listeners: Vec<Listener> = if inner.withhold_updates {
                Vec::new()
            } else {
                inner
                    .listeners
                    .get(path)
                    .map(|regs| regs.iter().map(|r| r.listener.clone()).collect())
                    .unwrap_or_default()
            };

            let ack = if inner.hold_acks {
                inner.held_acks.push(ack);
                None
            } else {
                Some(ack)
            };
            (ack, merged, listeners, 1 + inner.extra_deliveries, inner.delivery_delay)
        };

        tracing::debug!(
            "MemoryStore put at {} ({} listener(s))",
            path,
            listeners.len()
        );

        // Listeners fire before the ack.
        deliver(delay, move || {
            for _ in 0..repeats {
                for listener in &listeners {
                    listener(update.clone());
                }
            }
            if let Some(ack) = ack {
                ack(Ack::ok());
            }
        });

        Ok(())
    }
}

fn deliver(delay: Option<Duration>, f: impl FnOnce() + Send + 'static) {
    match delay {
        Some(delay) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                f();
            });
        }
        None => f(),
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl GraphStore for MemoryStore {
    type Node = MemoryNode;

    fn get(&self, key: &str) -> MemoryNode {
        MemoryNode {
            store: self.clone(),
            path: NodePath::root(key),
        }
    }

    fn is_connected(&self) -> bool {
        !self.lock().disconnected
    }
}

/// Node handle into a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryNode {
    store: MemoryStore,
    path: NodePath,
}

impl GraphNode for MemoryNode {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn next(&self, key: &str) -> Self {
        Self {
            store: self.store.clone(),
            path: self.path.child(key),
        }
    }

    fn on(&self, listener: Listener) -> Result<Option<Unsubscribe>, StoreError> {
        let (id, return_handle) = self.store.register(&self.path, listener);
        if !return_handle {
            return Ok(None);
        }

        let store = self.store.clone();
        let path = self.path.clone();
        Ok(Some(Box::new(move || store.deregister(&path, |r| r.id == id))))
    }

    fn off(&self, listener: &Listener) -> Result<(), StoreError> {
        self.store
            .deregister(&self.path, |r| same_listener(&r.listener, listener))
    }

    fn put(&self, value: Value, ack: AckCallback) -> Result<(), StoreError> {
        self.store.apply_put(&self.path, value, ack)
    }
}
