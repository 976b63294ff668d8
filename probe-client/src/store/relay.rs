//! RelayStore - graph store backed by a relay over WebSocket.
//!
//! Node operations are translated into relay frames:
//! - `on` → `sub`, with pushed `data` frames routed to the listener
//! - `off` / unsubscribe handle → `unsub`
//! - `put` → `put`, with the `ack` frame routed to the ack callback
//!
//! A reader task dispatches incoming frames; a writer task owns the socket
//! sink. Listeners and ack callbacks run on the reader task.

use super::{same_listener, AckCallback, GraphNode, GraphStore, Listener, StoreError, Unsubscribe};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use relayprobe_types::{Ack, Frame, GetFrame, NodePath, PutFrame, SubFrame, UnsubFrame};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Configuration for RelayStore.
#[derive(Clone, Debug)]
pub struct RelayStoreConfig {
    /// WebSocket connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for one-shot reads.
    pub request_timeout: Duration,
}

impl Default for RelayStoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Subscription {
    path: NodePath,
    listener: Listener,
}

type GetReply = Result<Value, StoreError>;

/// State shared between the store, its nodes and the socket tasks.
///
/// Ack callbacks are `Send` but not `Sync`, so each sits behind its own
/// mutex to keep `Shared` shareable across tasks.
struct Shared {
    outgoing: mpsc::UnboundedSender<Message>,
    pending_acks: DashMap<String, Mutex<AckCallback>>,
    pending_gets: DashMap<String, oneshot::Sender<GetReply>>,
    subscriptions: DashMap<String, Subscription>,
    connected: AtomicBool,
}

impl Shared {
    fn send(&self, frame: Frame) -> Result<(), StoreError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let text = frame.to_text()?;
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| StoreError::Closed)
    }

    fn take_ack(&self, id: &str) -> Option<AckCallback> {
        let (_, slot) = self.pending_acks.remove(id)?;
        slot.into_inner().ok()
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Ack(ack) => match self.take_ack(&ack.reply_to) {
                Some(callback) => callback(ack.classify()),
                None => tracing::debug!("Ack for unknown put {}", ack.reply_to),
            },
            Frame::Data(data) => {
                if let Some((_, tx)) = self.pending_gets.remove(&data.reply_to) {
                    let _ = tx.send(Ok(data.value));
                    return;
                }
                let listener = self
                    .subscriptions
                    .get(&data.reply_to)
                    .map(|sub| sub.listener.clone());
                match listener {
                    Some(listener) => listener(data.value),
                    None => tracing::debug!("Data for inactive subscription {}", data.reply_to),
                }
            }
            Frame::Error(err) => {
                tracing::warn!("Relay reported error: {}", err.message);
                let Some(id) = err.reply_to else { return };
                if let Some(callback) = self.take_ack(&id) {
                    callback(Ack::error(&err.message));
                } else if let Some((_, tx)) = self.pending_gets.remove(&id) {
                    let _ = tx.send(Err(StoreError::Rejected(err.message)));
                } else if let Some((_, sub)) = self.subscriptions.remove(&id) {
                    tracing::warn!("Subscription {} to {} rejected: {}", id, sub.path, err.message);
                }
            }
            other => tracing::warn!("Unexpected frame from relay: {:?}", other),
        }
    }

    /// Fail everything in flight once the socket is gone.
    fn fail_pending(&self) {
        self.connected.store(false, Ordering::Release);

        let ids: Vec<String> = self.pending_acks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(callback) = self.take_ack(&id) {
                callback(Ack::error("connection closed"));
            }
        }
        self.pending_gets.clear();
        self.subscriptions.clear();
    }
}

/// Graph store client for a relay.
///
/// # Example
///
/// ```ignore
/// let store = RelayStore::connect("ws://127.0.0.1:8765/ws").await?;
/// let node = store.get("test").next("data");
/// node.put(json!({ "message": "hi" }), Box::new(|ack| println!("{ack}")))?;
/// ```
pub struct RelayStore {
    shared: Arc<Shared>,
    config: RelayStoreConfig,
    url: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for RelayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStore")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.shared.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl RelayStore {
    /// Connect to a relay WebSocket endpoint with default configuration.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RelayStoreConfig::default()).await
    }

    /// Connect to a relay WebSocket endpoint.
    pub async fn connect_with_config(url: &str, config: RelayStoreConfig) -> Result<Self, StoreError> {
        let (ws, _response) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();

        let shared = Arc::new(Shared {
            outgoing,
            pending_acks: DashMap::new(),
            pending_gets: DashMap::new(),
            subscriptions: DashMap::new(),
            connected: AtomicBool::new(true),
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("Relay socket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match Frame::from_text(&text) {
                        Ok(frame) => reader_shared.dispatch(frame),
                        Err(e) => tracing::warn!("Dropping malformed relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!("Relay socket read failed: {}", e);
                        break;
                    }
                }
            }
            reader_shared.fail_pending();
        });

        tracing::info!("Connected to relay at {}", url);

        Ok(Self {
            shared,
            config,
            url: url.to_string(),
            reader,
            writer,
        })
    }

    /// The relay URL this store is connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Read the current value of a node once, including metadata.
    ///
    /// Returns `Value::Null` when the node does not exist.
    pub async fn fetch(&self, path: &NodePath) -> Result<Value, StoreError> {
        let id = Frame::next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending_gets.insert(id.clone(), tx);

        if let Err(e) = self.shared.send(Frame::Get(GetFrame {
            id: id.clone(),
            path: path.clone(),
        })) {
            self.shared.pending_gets.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => {
                self.shared.pending_gets.remove(&id);
                Err(StoreError::Timeout)
            }
        }
    }

    /// Close the connection gracefully.
    pub fn close(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            let _ = self.shared.outgoing.send(Message::Close(None));
        }
    }
}

impl Drop for RelayStore {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl GraphStore for RelayStore {
    type Node = RelayNode;

    fn get(&self, key: &str) -> RelayNode {
        RelayNode {
            shared: self.shared.clone(),
            path: NodePath::root(key),
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

/// Node handle into a [`RelayStore`].
#[derive(Clone)]
pub struct RelayNode {
    shared: Arc<Shared>,
    path: NodePath,
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode").field("path", &self.path).finish()
    }
}

impl GraphNode for RelayNode {
    fn path(&self) -> &NodePath {
        &self.path
    }

    fn next(&self, key: &str) -> Self {
        Self {
            shared: self.shared.clone(),
            path: self.path.child(key),
        }
    }

    fn on(&self, listener: Listener) -> Result<Option<Unsubscribe>, StoreError> {
        let id = Frame::next_id();
        self.shared.subscriptions.insert(
            id.clone(),
            Subscription {
                path: self.path.clone(),
                listener,
            },
        );

        if let Err(e) = self.shared.send(Frame::Sub(SubFrame {
            id: id.clone(),
            path: self.path.clone(),
        })) {
            self.shared.subscriptions.remove(&id);
            return Err(e);
        }

        let shared = self.shared.clone();
        Ok(Some(Box::new(move || {
            shared.subscriptions.remove(&id);
            shared.send(Frame::Unsub(UnsubFrame { id }))
        })))
    }

    fn off(&self, listener: &Listener) -> Result<(), StoreError> {
        let ids: Vec<String> = self
            .shared
            .subscriptions
            .iter()
            .filter(|e| e.path == self.path && same_listener(&e.listener, listener))
            .map(|e| e.key().clone())
            .collect();

        let mut result = Ok(());
        for id in ids {
            self.shared.subscriptions.remove(&id);
            if let Err(e) = self.shared.send(Frame::Unsub(UnsubFrame { id })) {
                result = Err(e);
            }
        }
        result
    }

    fn put(&self, value: Value, ack: AckCallback) -> Result<(), StoreError> {
        let id = Frame::next_id();
        self.shared.pending_acks.insert(id.clone(), Mutex::new(ack));

        if let Err(e) = self.shared.send(Frame::Put(PutFrame {
            id: id.clone(),
            path: self.path.clone(),
            value,
        })) {
            self.shared.pending_acks.remove(&id);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayprobe_types::{AckFrame, DataFrame, ErrorFrame};
    use serde_json::json;

    fn detached() -> (Arc<Shared>, mpsc::UnboundedReceiver<Message>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outgoing,
            pending_acks: DashMap::new(),
            pending_gets: DashMap::new(),
            subscriptions: DashMap::new(),
            connected: AtomicBool::new(true),
        });
        (shared, rx)
    }

    fn node(shared: &Arc<Shared>) -> RelayNode {
        RelayNode {
            shared: shared.clone(),
            path: NodePath::root("test").child("data"),
        }
    }

    fn sent_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> Frame {
        match rx.try_recv().expect("frame sent") {
            Message::Text(text) => Frame::from_text(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn put_sends_frame_and_routes_ack() {
        let (shared, mut rx) = detached();
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();

        node(&shared)
            .put(json!({ "message": "hi" }), Box::new(move |ack: Ack| *sink.lock().unwrap() = Some(ack)))
            .unwrap();

        let Frame::Put(put) = sent_frame(&mut rx) else {
            panic!("expected put");
        };
        assert_eq!(put.path.soul(), "test/data");

        shared.dispatch(Frame::Ack(AckFrame::new(&put.id, &Ack::error("denied"))));
        assert_eq!(*slot.lock().unwrap(), Some(Ack::Err("error: denied".into())));
        assert!(shared.pending_acks.is_empty());
    }

    #[test]
    fn data_frames_reach_subscribed_listener() {
        let (shared, mut rx) = detached();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Listener = Arc::new(move |v: Value| sink.lock().unwrap().push(v));

        let handle = node(&shared).on(listener).unwrap().expect("handle");
        let Frame::Sub(sub) = sent_frame(&mut rx) else {
            panic!("expected sub");
        };

        shared.dispatch(Frame::Data(DataFrame {
            reply_to: sub.id.clone(),
            path: sub.path.clone(),
            value: json!({ "message": "pushed" }),
        }));
        assert_eq!(seen.lock().unwrap().len(), 1);

        handle().unwrap();
        assert!(matches!(sent_frame(&mut rx), Frame::Unsub(u) if u.id == sub.id));

        // Pushes after unsubscribe are ignored
        shared.dispatch(Frame::Data(DataFrame {
            reply_to: sub.id,
            path: sub.path,
            value: json!({ "message": "late" }),
        }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn off_matches_listener_identity() {
        let (shared, mut rx) = detached();
        let keep: Listener = Arc::new(|_: Value| {});
        let drop_me: Listener = Arc::new(|_: Value| {});
        let n = node(&shared);

        n.on(keep).unwrap();
        n.on(drop_me.clone()).unwrap();
        let _ = sent_frame(&mut rx);
        let _ = sent_frame(&mut rx);

        n.off(&drop_me).unwrap();
        assert!(matches!(sent_frame(&mut rx), Frame::Unsub(_)));
        assert_eq!(shared.subscriptions.len(), 1);
    }

    #[test]
    fn error_frame_fails_pending_put() {
        let (shared, mut rx) = detached();
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        node(&shared)
            .put(json!(1), Box::new(move |ack: Ack| *sink.lock().unwrap() = Some(ack)))
            .unwrap();
        let Frame::Put(put) = sent_frame(&mut rx) else {
            panic!("expected put");
        };

        shared.dispatch(Frame::Error(ErrorFrame {
            reply_to: Some(put.id),
            message: "frame too large".into(),
        }));

        assert_eq!(*slot.lock().unwrap(), Some(Ack::Err("error: frame too large".into())));
    }

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn store_and_node_are_shareable_across_tasks() {
        assert_shareable::<RelayStore>();
        assert_shareable::<RelayNode>();
    }

    #[tokio::test]
    async fn put_ack_is_delivered_from_another_task() {
        let (shared, mut rx) = detached();
        let (tx, ack_rx) = oneshot::channel();
        node(&shared)
            .put(json!(1), Box::new(move |ack: Ack| {
                let _ = tx.send(ack);
            }))
            .unwrap();
        let Frame::Put(put) = sent_frame(&mut rx) else {
            panic!("expected put");
        };

        let reader = shared.clone();
        tokio::spawn(async move {
            reader.dispatch(Frame::Ack(AckFrame::new(&put.id, &Ack::ok())));
        })
        .await
        .unwrap();

        assert_eq!(ack_rx.await.unwrap(), Ack::ok());
    }

    #[test]
    fn error_frame_drops_rejected_subscription() {
        let (shared, mut rx) = detached();
        node(&shared).on(Arc::new(|_: Value| {})).unwrap();
        let Frame::Sub(sub) = sent_frame(&mut rx) else {
            panic!("expected sub");
        };

        shared.dispatch(Frame::Error(ErrorFrame {
            reply_to: Some(sub.id),
            message: "invalid path".into(),
        }));

        assert!(shared.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn error_frame_answers_pending_get() {
        let (shared, _rx) = detached();
        let (tx, reply) = oneshot::channel();
        shared.pending_gets.insert("g1".into(), tx);

        shared.dispatch(Frame::Error(ErrorFrame {
            reply_to: Some("g1".into()),
            message: "invalid path".into(),
        }));

        match reply.await.unwrap() {
            Err(StoreError::Rejected(message)) => assert_eq!(message, "invalid path"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(shared.pending_gets.is_empty());
    }

    #[test]
    fn disconnect_fails_in_flight_puts() {
        let (shared, _rx) = detached();
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        node(&shared)
            .put(json!(1), Box::new(move |ack: Ack| *sink.lock().unwrap() = Some(ack)))
            .unwrap();

        shared.fail_pending();

        assert_eq!(*slot.lock().unwrap(), Some(Ack::Err("error: connection closed".into())));
        assert!(matches!(
            node(&shared).put(json!(1), Box::new(|_| {})),
            Err(StoreError::Closed)
        ));
    }

    #[test]
    fn send_failure_rolls_back_registration() {
        let (shared, rx) = detached();
        drop(rx);

        let result = node(&shared).on(Arc::new(|_: Value| {}));
        assert!(matches!(result, Err(StoreError::Closed)));
        assert!(shared.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn connect_to_unreachable_relay_fails() {
        let config = RelayStoreConfig {
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let result = RelayStore::connect_with_config("ws://127.0.0.1:1/ws", config).await;
        assert!(matches!(
            result,
            Err(StoreError::ConnectionFailed(_)) | Err(StoreError::Timeout)
        ));
    }
}
