//! Main Relay server coordination.
//!
//! Relay owns storage, the subscription table and the limits, and applies
//! puts: load, merge, save, then push to every subscriber of the path.

use crate::config::Config;
use crate::error::StorageResult;
use crate::limits::RateLimits;
use crate::storage::GraphStorage;
use dashmap::DashMap;
use relayprobe_types::{merge_put, DataFrame, Frame, NodePath};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};

/// Operational counters.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total puts applied.
    pub puts_total: AtomicU64,
    /// Total one-shot reads served.
    pub gets_total: AtomicU64,
    /// Total `data` frames pushed to subscribers.
    pub pushes_total: AtomicU64,
    /// Total WebSocket sessions accepted.
    pub connections_total: AtomicU64,
    /// Total upgrades refused at capacity.
    pub connections_rejected: AtomicU64,
    /// Total rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Total frames answered with `error`.
    pub errors_total: AtomicU64,
    /// Total frames dropped because a session's queue was full.
    pub pushes_dropped: AtomicU64,
    /// Total sessions closed for not draining their queue.
    pub slow_sessions_closed: AtomicU64,
}

/// Frames a session may have queued before it is considered stalled.
pub const OUTBOX_CAPACITY: usize = 1024;

/// Sender half of a session's bounded outgoing frame queue.
///
/// A push that finds the queue full is dropped and flags the queue as
/// overflowed; the owning session closes when it sees the flag.
#[derive(Clone, Debug)]
pub struct Outbox {
    frames: mpsc::Sender<Frame>,
    overflow: Arc<Notify>,
}

impl Outbox {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (frames, queue) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            frames,
            overflow: Arc::new(Notify::new()),
        };
        (outbox, queue)
    }

    /// Queue a frame without waiting. Returns false if it was dropped.
    pub fn push(&self, frame: Frame) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Resolves once a push has been dropped for lack of room.
    pub async fn overflowed(&self) {
        self.overflow.notified().await
    }
}

struct Subscriber {
    session_id: u64,
    sub_id: String,
    outbox: Outbox,
}

/// Main relay server.
pub struct Relay {
    config: Config,
    storage: Arc<dyn GraphStorage>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    /// Live subscriptions per path.
    subscribers: DashMap<NodePath, Vec<Subscriber>>,
    /// Serializes read-merge-write cycles.
    write_lock: Mutex<()>,
    next_session_id: AtomicU64,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("storage", &self.storage.kind())
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("watched_paths", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a new Relay with the given config and storage.
    pub fn new(config: Config, storage: Arc<dyn GraphStorage>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            storage,
            rate_limits,
            metrics: RelayMetrics::default(),
            subscribers: DashMap::new(),
            write_lock: Mutex::new(()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &dyn GraphStorage {
        self.storage.as_ref()
    }

    /// Get access to the limits.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Allocate an id for a new session.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply a put and push the merged node to subscribers of `path`.
    ///
    /// Subscribers are notified before this returns, so a session that
    /// subscribed and then wrote sees the `data` frame ahead of its `ack`.
    pub async fn put(&self, path: &NodePath, value: Value) -> StorageResult<Value> {
        let merged = {
            let _guard = self.write_lock.lock().await;
            let existing = self.storage.load(path).await?;
            let merged = merge_put(existing, path, value, current_millis());
            self.storage.save(path, &merged).await?;
            merged
        };

        self.metrics.puts_total.fetch_add(1, Ordering::Relaxed);
        self.notify(path, &merged);
        Ok(merged)
    }

    /// Current value of a node.
    pub async fn get(&self, path: &NodePath) -> StorageResult<Option<Value>> {
        self.metrics.gets_total.fetch_add(1, Ordering::Relaxed);
        self.storage.load(path).await
    }

    /// Register a subscription. Later puts to `path` are pushed to `outbox`
    /// as `data` frames answering `sub_id`.
    pub fn subscribe(&self, path: &NodePath, session_id: u64, sub_id: &str, outbox: Outbox) {
        self.subscribers
            .entry(path.clone())
            .or_default()
            .push(Subscriber {
                session_id,
                sub_id: sub_id.to_string(),
                outbox,
            });
        tracing::debug!("Session {} subscribed to {} as {}", session_id, path, sub_id);
    }

    /// Remove one subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, session_id: u64, sub_id: &str) -> bool {
        let removed = self.remove_where(|s| s.session_id == session_id && s.sub_id == sub_id);
        if removed > 0 {
            tracing::debug!("Session {} unsubscribed {}", session_id, sub_id);
        }
        removed > 0
    }

    /// Remove every subscription of a closing session.
    pub fn drop_session(&self, session_id: u64) {
        let removed = self.remove_where(|s| s.session_id == session_id);
        tracing::debug!("Session {} closed ({} subscriptions released)", session_id, removed);
    }

    /// Number of subscriptions on `path`.
    pub fn subscriber_count(&self, path: &NodePath) -> usize {
        self.subscribers.get(path).map_or(0, |subs| subs.len())
    }

    /// Number of open WebSocket sessions.
    pub fn active_connections(&self) -> usize {
        self.rate_limits.active_connections()
    }

    fn notify(&self, path: &NodePath, value: &Value) {
        let Some(subs) = self.subscribers.get(path) else {
            return;
        };

        let mut sent = 0;
        let mut dropped = 0;
        for sub in subs.iter() {
            let frame = Frame::Data(DataFrame {
                reply_to: sub.sub_id.clone(),
                path: path.clone(),
                value: value.clone(),
            });
            if sub.outbox.push(frame) {
                sent += 1;
            } else if !sub.outbox.frames.is_closed() {
                tracing::warn!("Session {} queue full, dropping push for {}", sub.session_id, path);
                dropped += 1;
            }
        }
        self.metrics.pushes_total.fetch_add(sent, Ordering::Relaxed);
        self.metrics.pushes_dropped.fetch_add(dropped, Ordering::Relaxed);
        tracing::debug!("Pushed {} to {}/{} subscribers", path, sent, subs.len());
    }

    fn remove_where(&self, matches: impl Fn(&Subscriber) -> bool) -> usize {
        let mut removed = 0;
        self.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| !matches(s));
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraph;
    use serde_json::json;

    fn test_relay() -> Relay {
        Relay::new(Config::default(), Arc::new(MemoryGraph::new()))
    }

    fn path() -> NodePath {
        NodePath::root("test").child("data")
    }

    #[tokio::test]
    async fn put_merges_and_stores() {
        let relay = test_relay();

        relay.put(&path(), json!({ "a": 1 })).await.unwrap();
        let merged = relay.put(&path(), json!({ "b": 2 })).await.unwrap();

        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
        assert_eq!(merged["#"], "test/data");
        assert_eq!(relay.get(&path()).await.unwrap(), Some(merged));
        assert_eq!(relay.metrics().puts_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn subscribers_receive_later_puts() {
        let relay = test_relay();
        let (tx, mut rx) = Outbox::new(OUTBOX_CAPACITY);

        relay.subscribe(&path(), 1, "s1", tx);
        relay.put(&path(), json!({ "message": "hi" })).await.unwrap();

        match rx.try_recv().unwrap() {
            Frame::Data(data) => {
                assert_eq!(data.reply_to, "s1");
                assert_eq!(data.path, path());
                assert_eq!(data.value["message"], "hi");
            }
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscribe_does_not_replay() {
        let relay = test_relay();
        relay.put(&path(), json!({ "old": true })).await.unwrap();

        let (tx, mut rx) = Outbox::new(OUTBOX_CAPACITY);
        relay.subscribe(&path(), 1, "s1", tx);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscriptions_are_per_path() {
        let relay = test_relay();
        let (tx, mut rx) = Outbox::new(OUTBOX_CAPACITY);

        relay.subscribe(&NodePath::root("other"), 1, "s1", tx);
        relay.put(&path(), json!({ "a": 1 })).await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_pushes() {
        let relay = test_relay();
        let (tx, mut rx) = Outbox::new(OUTBOX_CAPACITY);

        relay.subscribe(&path(), 1, "s1", tx);
        assert!(relay.unsubscribe(1, "s1"));
        assert!(!relay.unsubscribe(1, "s1"));
        assert_eq!(relay.subscriber_count(&path()), 0);

        relay.put(&path(), json!({ "a": 1 })).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_session_releases_only_its_subscriptions() {
        let relay = test_relay();
        let (tx1, _rx1) = Outbox::new(OUTBOX_CAPACITY);
        let (tx2, _rx2) = Outbox::new(OUTBOX_CAPACITY);

        relay.subscribe(&path(), 1, "a", tx1.clone());
        relay.subscribe(&NodePath::root("x"), 1, "b", tx1);
        relay.subscribe(&path(), 2, "a", tx2);

        relay.drop_session(1);

        assert_eq!(relay.subscriber_count(&path()), 1);
        assert_eq!(relay.subscriber_count(&NodePath::root("x")), 0);
    }

    #[tokio::test]
    async fn closed_outbox_is_skipped() {
        let relay = test_relay();
        let (tx, rx) = Outbox::new(OUTBOX_CAPACITY);
        drop(rx);

        relay.subscribe(&path(), 1, "s1", tx);
        relay.put(&path(), json!({ "a": 1 })).await.unwrap();

        assert_eq!(relay.metrics().pushes_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stalled_subscriber_overflows_without_growing() {
        let relay = test_relay();
        let (outbox, mut queue) = Outbox::new(2);
        relay.subscribe(&path(), 1, "s1", outbox.clone());

        for i in 0..5 {
            relay.put(&path(), json!({ "n": i })).await.unwrap();
        }

        assert_eq!(relay.metrics().pushes_total.load(Ordering::Relaxed), 2);
        assert_eq!(relay.metrics().pushes_dropped.load(Ordering::Relaxed), 3);
        tokio::time::timeout(std::time::Duration::from_secs(1), outbox.overflowed())
            .await
            .expect("overflow signalled");

        // Only the first two pushes were kept.
        assert!(matches!(queue.try_recv(), Ok(Frame::Data(d)) if d.value["n"] == 0));
        assert!(matches!(queue.try_recv(), Ok(Frame::Data(d)) if d.value["n"] == 1));
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn session_ids_are_unique() {
        let relay = test_relay();
        let a = relay.next_session_id();
        let b = relay.next_session_id();
        assert_ne!(a, b);
    }
}
