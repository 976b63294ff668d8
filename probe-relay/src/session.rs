//! Per-connection session management.
//!
//! Each WebSocket connection gets a Session that tracks its subscriptions
//! and answers its frames. Replies and subscription pushes share one
//! outgoing queue, so a session sees frames in the order the relay
//! produced them.

use crate::error::{SessionError, SessionResult};
use crate::server::{Outbox, Relay, OUTBOX_CAPACITY};
use axum::extract::ws::{Message, WebSocket};
use relayprobe_types::{Ack, AckFrame, DataFrame, ErrorFrame, Frame, NodePath, MAX_FRAME_SIZE};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// A per-connection session.
pub struct Session {
    relay: Arc<Relay>,
    id: u64,
    outbox: Outbox,
    subscriptions: HashSet<String>,
}

impl Session {
    /// Create a new session whose pushes are queued on `outbox`.
    pub fn new(relay: Arc<Relay>, outbox: Outbox) -> Self {
        let id = relay.next_session_id();
        Self {
            relay,
            id,
            outbox,
            subscriptions: HashSet::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle one text frame, returning the direct reply if there is one.
    pub async fn handle_text(&mut self, text: &str) -> Option<Frame> {
        let frame = match Frame::from_text(text) {
            Ok(frame) => frame,
            Err(e) => return Some(self.reject_undecodable(text, SessionError::from(e))),
        };
        let request_id = request_id(&frame);

        if let Err(e) = self.relay.rate_limits().check_message(self.id) {
            tracing::warn!("Session {} rate limited: {}", self.id, e);
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            return Some(self.reject(request_id, e.into()));
        }

        match self.handle_frame(frame).await {
            Ok(reply) => reply,
            Err(e) => Some(self.reject(request_id, e)),
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> SessionResult<Option<Frame>> {
        match frame {
            Frame::Put(put) => {
                let ack_value = match self.relay.put(&put.path, put.value).await {
                    Ok(_) => Ack::ok(),
                    Err(e) => {
                        tracing::warn!("Put to {} failed: {}", put.path, e);
                        Ack::error(&e.to_string())
                    }
                };
                Ok(Some(ack(&put.id, ack_value)))
            }
            Frame::Get(get) => {
                match self.relay.get(&get.path).await {
                    Ok(value) => Ok(Some(Frame::Data(DataFrame {
                        reply_to: get.id,
                        path: get.path,
                        value: value.unwrap_or_default(),
                    }))),
                    Err(e) => Ok(Some(error(Some(get.id), &e.to_string()))),
                }
            }
            Frame::Sub(sub) => {
                if !self.subscriptions.insert(sub.id.clone()) {
                    return Ok(Some(error(Some(sub.id), "duplicate subscription id")));
                }
                self.subscribe(&sub.path, &sub.id);
                Ok(None)
            }
            Frame::Unsub(unsub) => {
                if self.subscriptions.remove(&unsub.id) {
                    self.relay.unsubscribe(self.id, &unsub.id);
                }
                Ok(None)
            }
            Frame::Ack(_) => Err(SessionError::UnexpectedFrame("ack")),
            Frame::Data(_) => Err(SessionError::UnexpectedFrame("data")),
            Frame::Error(_) => Err(SessionError::UnexpectedFrame("error")),
        }
    }

    fn subscribe(&self, path: &NodePath, sub_id: &str) {
        self.relay.subscribe(path, self.id, sub_id, self.outbox.clone());
    }

    fn reject(&self, reply_to: Option<String>, e: SessionError) -> Frame {
        tracing::debug!("Session {} frame rejected: {}", self.id, e);
        self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
        error(reply_to, &e.to_string())
    }

    /// Answer a frame that failed to decode, addressing the reply to its
    /// `id` when one can be read. A put is answered with an error ack.
    fn reject_undecodable(&self, text: &str, e: SessionError) -> Frame {
        let raw: Option<serde_json::Value> = if text.len() <= MAX_FRAME_SIZE {
            serde_json::from_str(text).ok()
        } else {
            None
        };
        let field = |name: &str| {
            raw.as_ref()
                .and_then(|v| v.get(name))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        let id = field("id");

        match (field("type").as_deref(), id) {
            (Some("put"), Some(id)) => {
                tracing::debug!("Session {} put {} rejected: {}", self.id, id, e);
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                ack(&id, Ack::error(&e.to_string()))
            }
            (_, id) => self.reject(id, e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.relay.drop_session(self.id);
    }
}

fn request_id(frame: &Frame) -> Option<String> {
    match frame {
        Frame::Put(f) => Some(f.id.clone()),
        Frame::Get(f) => Some(f.id.clone()),
        Frame::Sub(f) => Some(f.id.clone()),
        Frame::Unsub(f) => Some(f.id.clone()),
        _ => None,
    }
}

fn ack(reply_to: &str, ack: Ack) -> Frame {
    Frame::Ack(AckFrame::new(reply_to, &ack))
}

fn error(reply_to: Option<String>, message: &str) -> Frame {
    Frame::Error(ErrorFrame {
        reply_to,
        message: message.to_string(),
    })
}

/// Run a WebSocket session until the peer disconnects.
///
/// `permit` holds the connection slot and is released on return.
pub async fn run(relay: Arc<Relay>, mut socket: WebSocket, permit: OwnedSemaphorePermit) {
    let (outbox, mut queue) = Outbox::new(OUTBOX_CAPACITY);
    let mut session = Session::new(relay.clone(), outbox.clone());
    relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        "Session {} opened ({} active)",
        session.id(),
        relay.active_connections()
    );

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!("Session {} read error: {}", session.id(), e);
                        break;
                    }
                    None => break,
                };

                let reply = match message {
                    Message::Text(text) => session.handle_text(&text).await,
                    Message::Binary(_) => Some(session.reject(None, SessionError::BinaryFrame)),
                    Message::Close(_) => break,
                    // Pings are answered by axum.
                    Message::Ping(_) | Message::Pong(_) => None,
                };
                if let Some(frame) = reply {
                    outbox.push(frame);
                }
            }
            outgoing = queue.recv() => {
                let Some(frame) = outgoing else { break };
                let text = match frame.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode frame: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = outbox.overflowed() => {
                tracing::warn!(
                    "Session {} is not reading its frames (queue of {} full), closing",
                    session.id(),
                    OUTBOX_CAPACITY
                );
                relay
                    .metrics()
                    .slow_sessions_closed
                    .fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    let id = session.id();
    drop(session);
    drop(permit);
    tracing::info!("Session {} closed", id);
}
