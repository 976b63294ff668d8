//! JSON frames exchanged with the relay over WebSocket.
//!
//! Every frame is a JSON object tagged by `type`. Requests carry a
//! client-chosen `id`; responses and pushes echo it in `reply_to`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Ack, NodePath, WireError};

/// Largest text frame either side accepts (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// All relay frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Write a value (client → relay)
    Put(PutFrame),
    /// One-shot read (client → relay)
    Get(GetFrame),
    /// Start receiving pushes for a path (client → relay)
    Sub(SubFrame),
    /// Stop a subscription (client → relay)
    Unsub(UnsubFrame),
    /// Acknowledge a put (relay → client)
    Ack(AckFrame),
    /// A value for a get or subscription (relay → client)
    Data(DataFrame),
    /// A request could not be handled (relay → client)
    Error(ErrorFrame),
}

impl Frame {
    /// Generate a fresh request id.
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame no larger than [`MAX_FRAME_SIZE`].
    pub fn from_text(text: &str) -> Result<Self, WireError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: text.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }

    /// The request id this frame answers, if any.
    pub fn reply_to(&self) -> Option<&str> {
        match self {
            Frame::Ack(a) => Some(&a.reply_to),
            Frame::Data(d) => Some(&d.reply_to),
            Frame::Error(e) => e.reply_to.as_deref(),
            _ => None,
        }
    }
}

/// Write `value` at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutFrame {
    /// Request id
    pub id: String,
    /// Target node
    pub path: NodePath,
    /// Value to merge (objects) or replace (scalars)
    pub value: Value,
}

/// Read the current value at `path` once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFrame {
    /// Request id
    pub id: String,
    /// Target node
    pub path: NodePath,
}

/// Receive every later write to `path`. The current value is not replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubFrame {
    /// Subscription id
    pub id: String,
    /// Watched node
    pub path: NodePath,
}

/// Cancel the subscription with this id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubFrame {
    /// Subscription id
    pub id: String,
}

/// Acknowledgement for a put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFrame {
    /// Put request id
    pub reply_to: String,
    /// Raw ack token; see [`Ack`]
    #[serde(default)]
    pub ack: Option<String>,
}

impl AckFrame {
    /// Build an ack frame from a classified acknowledgement.
    pub fn new(reply_to: &str, ack: &Ack) -> Self {
        Self {
            reply_to: reply_to.to_string(),
            ack: ack.as_raw().map(str::to_string),
        }
    }

    /// Classify the carried token.
    pub fn classify(&self) -> Ack {
        Ack::from_raw(self.ack.as_deref())
    }
}

/// A node value delivered to a get or a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Get or subscription id
    pub reply_to: String,
    /// Node the value belongs to
    pub path: NodePath,
    /// Stored value including metadata, or null when absent
    #[serde(default)]
    pub value: Value,
}

/// Failure report for a request, or for a frame that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Request id when it could be determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Human-readable reason
    pub message: String,
}
