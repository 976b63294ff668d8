//! # relayprobe-relay
//!
//! Relay hosting a path-addressed graph store over WebSocket, next to a
//! trivial health check.
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                      ┌── Client B
//!            │   JSON over /ws      │
//!            ├─────────────────────►│
//!            │                      │
//!        ┌───┴──────────────────────┴───┐
//!        │       relayprobe-relay       │
//!        │  sessions ─► Relay ─► push   │
//!        │  ┌────────────────────────┐  │
//!        │  │ SQLite / memory nodes  │  │
//!        │  └────────────────────────┘  │
//!        └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Text frames tagged by `type` (see `relayprobe_types::Frame`):
//! - `put` → `ack` (`"ok"` or `"error: ..."`)
//! - `get` → `data` (value or null)
//! - `sub` → `data` for every later put to the path (no replay)
//! - `unsub`
//! - malformed or unexpected frames → `error`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod server;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::{RelayError, Result};
pub use server::Relay;
