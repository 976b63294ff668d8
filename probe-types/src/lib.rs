//! # probe-types
//!
//! Data model and wire format types shared by the relayprobe crates.
//!
//! - [`TestRecord`] - the record written and read back by the sync probe
//! - [`strip_metadata`], [`is_qualifying`] - read-side helpers for store values
//! - [`Ack`] - classification of store write acknowledgements
//! - [`NodePath`], [`merge_put`] - path-addressed store keys and node merge rules
//! - [`Frame`] - JSON frames exchanged with the relay over WebSocket
//! - [`WireError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod ack;
mod error;
mod graph;
mod messages;
mod metadata;
mod path;
mod record;

pub use ack::{Ack, ERROR_MARKER, OK_TOKEN};
pub use error::WireError;
pub use graph::merge_put;
pub use messages::{
    AckFrame, DataFrame, ErrorFrame, Frame, GetFrame, PutFrame, SubFrame, UnsubFrame, MAX_FRAME_SIZE,
};
pub use metadata::{is_qualifying, strip_metadata, BACKREF_FIELD, EXPECTED_FIELDS, IDENTITY_FIELD};
pub use path::NodePath;
pub use record::TestRecord;
