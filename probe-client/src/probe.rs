//! SyncProbe - bounded write-then-read confirmation against a graph store.
//!
//! The probe arms a read subscription on the target node, issues the write,
//! waits for the write acknowledgement, then waits for the subscription to
//! observe a qualifying value.
//!
//! # Ordering
//!
//! The store pushes values to listeners registered at the time of the write;
//! nothing is replayed to late subscribers. The subscription therefore has to
//! be live before the put is issued, otherwise the notification can be
//! missed and the read times out. [`ProbeOrder::WriteFirst`] exists to
//! exercise exactly that failure.
//!
//! ```text
//!   on(listener) ──► put(value) ──► await ack (5s) ──► await read (15s) ──► release
//!        │                                                  ▲
//!        └──────────── first qualifying push ───────────────┘
//! ```

use crate::store::{GraphNode, Listener, StoreError, Unsubscribe};
use relayprobe_types::{is_qualifying, strip_metadata, Ack};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Default bound on waiting for a write acknowledgement.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default bound on waiting for the read confirmation.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Probe failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No acknowledgement arrived in time.
    #[error("write not acknowledged within {0:?}")]
    WriteTimeout(Duration),

    /// The store acknowledged the write with an error.
    #[error("write rejected: {0}")]
    WriteError(String),

    /// No qualifying value arrived in time.
    #[error("no data received within {0:?}")]
    ReadTimeout(Duration),

    /// The store failed while the operations were being set up.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ProbeError {
    /// True for either timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WriteTimeout(_) | Self::ReadTimeout(_))
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteTimeout(_) => "write_timeout",
            Self::WriteError(_) => "write_error",
            Self::ReadTimeout(_) => "read_timeout",
            Self::Store(_) => "store",
        }
    }
}

/// When the read subscription is registered relative to the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeOrder {
    /// Subscribe, then write. The only ordering that cannot miss the push.
    #[default]
    SubscribeFirst,
    /// Write, then subscribe. Not guaranteed to observe the write.
    WriteFirst,
}

/// Configuration for SyncProbe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Bound on waiting for the write acknowledgement.
    pub write_timeout: Duration,
    /// Bound on waiting for the read confirmation.
    pub read_timeout: Duration,
    /// Subscription/write ordering.
    pub order: ProbeOrder,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            order: ProbeOrder::SubscribeFirst,
        }
    }
}

impl ProbeConfig {
    /// Set the write acknowledgement timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the read confirmation timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the subscription/write ordering.
    pub fn with_order(mut self, order: ProbeOrder) -> Self {
        self.order = order;
        self
    }
}

/// Result of a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// The store's acknowledgement.
    pub ack: Ack,
    /// First qualifying value, metadata stripped.
    pub value: Value,
    /// Time from issuing the write to its acknowledgement.
    pub write_latency: Duration,
    /// Time from issuing the write to the read confirmation.
    pub read_latency: Duration,
}

/// Write-then-read coordinator.
#[derive(Debug, Clone, Default)]
pub struct SyncProbe {
    config: ProbeConfig,
}

impl SyncProbe {
    /// Create a probe with the given configuration.
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// The probe configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Write `value` to `node` and wait until the write is observed.
    ///
    /// The subscription is released exactly once on every exit path.
    pub async fn run<N: GraphNode>(&self, node: &N, value: Value) -> Result<ProbeOutcome, ProbeError> {
        tracing::debug!("Probing {} ({:?})", node.path(), self.config.order);

        let (mut watch, started, ack_rx) = match self.config.order {
            ProbeOrder::SubscribeFirst => {
                let watch = ReadWatch::arm(node)?;
                let started = Instant::now();
                let ack_rx = issue_write(node, value)?;
                (watch, started, ack_rx)
            }
            ProbeOrder::WriteFirst => {
                let started = Instant::now();
                let ack_rx = issue_write(node, value)?;
                let watch = ReadWatch::arm(node)?;
                (watch, started, ack_rx)
            }
        };

        let ack = match await_ack(ack_rx, self.config.write_timeout).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!("Write to {} failed: {}", node.path(), e);
                watch.release();
                return Err(e);
            }
        };
        let write_latency = started.elapsed();
        tracing::debug!("Write to {} acknowledged after {:?}", node.path(), write_latency);

        let result = watch.wait(self.config.read_timeout).await;
        watch.release();

        let value = result?;
        let read_latency = started.elapsed();
        tracing::info!(
            "Probe of {} confirmed (write {:?}, read {:?})",
            node.path(),
            write_latency,
            read_latency
        );

        Ok(ProbeOutcome {
            ack,
            value,
            write_latency,
            read_latency,
        })
    }
}

fn issue_write<N: GraphNode>(node: &N, value: Value) -> Result<oneshot::Receiver<Ack>, StoreError> {
    let (tx, rx) = oneshot::channel();
    node.put(
        value,
        Box::new(move |ack| {
            let _ = tx.send(ack);
        }),
    )?;
    Ok(rx)
}

async fn await_ack(rx: oneshot::Receiver<Ack>, timeout: Duration) -> Result<Ack, ProbeError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ack::Err(message))) => Err(ProbeError::WriteError(message)),
        Ok(Ok(ack)) => Ok(ack),
        // The store dropped the callback without calling it.
        Ok(Err(_)) => Err(ProbeError::Store(StoreError::Closed)),
        Err(_) => Err(ProbeError::WriteTimeout(timeout)),
    }
}

/// A live read subscription that settles at most once.
struct ReadWatch<N: GraphNode> {
    node: N,
    listener: Listener,
    handle: Option<Unsubscribe>,
    rx: oneshot::Receiver<Value>,
    released: bool,
}

impl<N: GraphNode> ReadWatch<N> {
    fn arm(node: &N) -> Result<Self, StoreError> {
        let (tx, rx) = oneshot::channel();
        let settled = Arc::new(AtomicBool::new(false));
        let tx = Mutex::new(Some(tx));

        let listener: Listener = Arc::new(move |value: Value| {
            if !is_qualifying(&value) {
                return;
            }
            if settled.swap(true, Ordering::AcqRel) {
                tracing::debug!("Ignoring delivery after read settled");
                return;
            }
            let sender = tx.lock().ok().and_then(|mut slot| slot.take());
            if let Some(sender) = sender {
                let _ = sender.send(strip_metadata(&value));
            }
        });

        let handle = node.on(listener.clone())?;

        Ok(Self {
            node: node.clone(),
            listener,
            handle,
            rx,
            released: false,
        })
    }

    async fn wait(&mut self, timeout: Duration) -> Result<Value, ProbeError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ProbeError::Store(StoreError::Closed)),
            Err(_) => Err(ProbeError::ReadTimeout(timeout)),
        }
    }

    /// Deregister the listener. Idempotent; failures are logged and dropped.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let result = match self.handle.take() {
            Some(unsubscribe) => unsubscribe(),
            None => self.node.off(&self.listener),
        };
        if let Err(e) = result {
            tracing::debug!("Ignoring unsubscribe failure on {}: {}", self.node.path(), e);
        }
    }
}

impl<N: GraphNode> Drop for ReadWatch<N> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, MemoryStore};
    use relayprobe_types::{NodePath, TestRecord};
    use serde_json::json;

    fn scenario() -> TestRecord {
        TestRecord::with_timestamp(TestRecord::DEFAULT_MESSAGE, 1_700_000_000_000, "testuser_123")
    }

    fn target() -> NodePath {
        NodePath::root("test").child("data")
    }

    // ===========================================
    // Round trip
    // ===========================================

    #[tokio::test]
    async fn scenario_round_trip() {
        let store = MemoryStore::new();
        let node = store.get("test").next("data");
        let record = scenario();

        let outcome = SyncProbe::default()
            .run(&node, record.to_value().unwrap())
            .await
            .unwrap();

        assert!(record.matches(&outcome.value));
        assert_eq!(outcome.value, record.to_value().unwrap());
        assert_eq!(outcome.ack, Ack::ok());
    }

    #[tokio::test]
    async fn read_result_has_no_metadata() {
        let store = MemoryStore::new();
        let node = store.get("test").next("data");

        let outcome = SyncProbe::default()
            .run(&node, json!({ "message": "m" }))
            .await
            .unwrap();

        assert!(outcome.value.get("_").is_none());
        assert!(outcome.value.get("#").is_none());
        // The stored node still carries them
        assert!(store.value_at(&target()).unwrap().get("_").is_some());
    }

    #[tokio::test]
    async fn scalar_values_are_accepted() {
        let store = MemoryStore::new();
        let node = store.get("test").next("flag");

        let outcome = SyncProbe::default().run(&node, json!("on")).await.unwrap();
        assert_eq!(outcome.value, json!("on"));
    }

    // ===========================================
    // Ordering
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn subscribe_first_survives_background_delivery() {
        let store = MemoryStore::new();
        store.set_delivery_delay(Some(Duration::from_millis(250)));
        let node = store.get("test").next("data");

        let outcome = SyncProbe::default()
            .run(&node, scenario().to_value().unwrap())
            .await
            .unwrap();

        assert!(scenario().matches(&outcome.value));
        assert!(outcome.write_latency >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn write_first_can_miss_the_push() {
        let store = MemoryStore::new();
        let node = store.get("test").next("data");
        let probe = SyncProbe::new(ProbeConfig::default().with_order(ProbeOrder::WriteFirst));

        let result = probe.run(&node, scenario().to_value().unwrap()).await;

        assert!(matches!(result, Err(ProbeError::ReadTimeout(_))));
        // The write itself landed
        assert!(store.value_at(&target()).is_some());
    }

    // ===========================================
    // Idempotent resolution
    // ===========================================

    #[tokio::test]
    async fn resolves_once_with_first_qualifying_value() {
        let store = MemoryStore::new();
        store.duplicate_deliveries(4);
        let node = store.get("test").next("data");

        let outcome = SyncProbe::default()
            .run(&node, json!({ "message": "first" }))
            .await
            .unwrap();

        assert_eq!(outcome.value, json!({ "message": "first" }));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_push_wins_over_the_write() {
        let store = MemoryStore::new();
        store.set_delivery_delay(Some(Duration::from_millis(10)));
        let node = store.get("test").next("data");

        let pusher = store.clone();
        tokio::spawn(async move {
            pusher.emit(&target(), json!({ "message": "from a peer" }));
        });

        let outcome = SyncProbe::default()
            .run(&node, json!({ "message": "mine" }))
            .await
            .unwrap();

        assert_eq!(outcome.value, json!({ "message": "from a peer" }));
    }

    #[tokio::test(start_paused = true)]
    async fn null_and_shapeless_values_are_skipped() {
        let store = MemoryStore::new();
        store.set_delivery_delay(Some(Duration::from_millis(10)));
        let node = store.get("test").next("data");

        let pusher = store.clone();
        tokio::spawn(async move {
            pusher.emit(&target(), Value::Null);
            pusher.emit(&target(), json!({ "_": { "#": "test/data" } }));
        });

        let outcome = SyncProbe::default()
            .run(&node, json!({ "username": "u" }))
            .await
            .unwrap();

        assert_eq!(outcome.value, json!({ "username": "u" }));
    }

    // ===========================================
    // Failures
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn missing_data_is_a_read_timeout() {
        let store = MemoryStore::new();
        store.withhold_updates(true);
        let node = store.get("test").next("data");

        let err = SyncProbe::default()
            .run(&node, scenario().to_value().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ProbeError::ReadTimeout(d) if d == DEFAULT_READ_TIMEOUT));
        assert_eq!(err.kind(), "read_timeout");
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn only_null_delivered_is_still_a_timeout() {
        let store = MemoryStore::new();
        store.withhold_updates(true);
        store.set_delivery_delay(Some(Duration::from_millis(10)));
        let node = store.get("test").next("data");

        let pusher = store.clone();
        tokio::spawn(async move {
            pusher.emit(&target(), Value::Null);
        });

        let err = SyncProbe::default().run(&node, json!({ "message": "m" })).await.unwrap_err();
        assert!(matches!(err, ProbeError::ReadTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_is_a_write_timeout() {
        let store = MemoryStore::new();
        store.hold_acks(true);
        let node = store.get("test").next("data");
        let probe = SyncProbe::new(ProbeConfig::default().with_write_timeout(Duration::from_millis(500)));

        let err = probe.run(&node, json!({ "message": "m" })).await.unwrap_err();

        assert!(matches!(err, ProbeError::WriteTimeout(d) if d == Duration::from_millis(500)));
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[tokio::test]
    async fn error_ack_is_a_write_error() {
        let store = MemoryStore::new();
        store.fail_next_ack("permission denied");
        let node = store.get("test").next("data");

        let err = SyncProbe::default().run(&node, json!({ "message": "m" })).await.unwrap_err();

        match err {
            ProbeError::WriteError(ack) => assert_eq!(ack, "error: permission denied"),
            other => panic!("expected write error, got {:?}", other),
        }
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[tokio::test]
    async fn synchronous_put_failure_surfaces() {
        let store = MemoryStore::new();
        store.fail_next_put("read-only replica");
        let node = store.get("test").next("data");

        let err = SyncProbe::default().run(&node, json!({ "message": "m" })).await.unwrap_err();

        assert!(matches!(err, ProbeError::Store(StoreError::Rejected(_))));
        assert_eq!(store.listener_count(&target()), 0);
    }

    // ===========================================
    // Cleanup
    // ===========================================

    #[tokio::test]
    async fn releases_through_returned_handle() {
        let store = MemoryStore::new();
        let node = store.get("test").next("data");

        SyncProbe::default().run(&node, json!({ "message": "m" })).await.unwrap();
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[tokio::test]
    async fn falls_back_to_off_without_handle() {
        let store = MemoryStore::new();
        store.set_return_handles(false);
        let node = store.get("test").next("data");

        SyncProbe::default().run(&node, json!({ "message": "m" })).await.unwrap();
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn releases_after_read_timeout() {
        let store = MemoryStore::new();
        store.withhold_updates(true);
        let node = store.get("test").next("data");

        let _ = SyncProbe::default().run(&node, json!({ "message": "m" })).await;
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[tokio::test]
    async fn unsubscribe_failure_is_swallowed() {
        let store = MemoryStore::new();
        store.fail_unsubscribe("listener table locked");
        let node = store.get("test").next("data");

        let outcome = SyncProbe::default().run(&node, json!({ "message": "m" })).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn repeated_runs_do_not_leak_listeners() {
        let store = MemoryStore::new();
        let node = store.get("test").next("data");
        let probe = SyncProbe::default();

        for i in 0..5 {
            probe.run(&node, json!({ "timestamp": i })).await.unwrap();
        }
        assert_eq!(store.listener_count(&target()), 0);
    }

    #[test]
    fn config_builders() {
        let config = ProbeConfig::default()
            .with_write_timeout(Duration::from_secs(1))
            .with_read_timeout(Duration::from_secs(2))
            .with_order(ProbeOrder::WriteFirst);

        assert_eq!(config.write_timeout, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.order, ProbeOrder::WriteFirst);
        assert_eq!(ProbeConfig::default().write_timeout, Duration::from_millis(5000));
        assert_eq!(ProbeConfig::default().read_timeout, Duration::from_millis(15000));
    }
}
