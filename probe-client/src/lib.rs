//! # relayprobe-client
//!
//! Client side of relayprobe: graph store access, the sync probe and the
//! integration harness.
//!
//! ## Components
//!
//! - **Store**: path-addressed `get/put/on/off` API ([`GraphStore`],
//!   [`GraphNode`]) with an in-process [`MemoryStore`] and a WebSocket
//!   [`RelayStore`] talking to `relayprobe-relay`
//! - **Probe**: [`SyncProbe`], a bounded write-then-read confirmation
//! - **Identity**: [`IdentityService`] plus the in-memory [`MemoryIdentity`]
//! - **Harness**: [`Harness`], the staged integration run
//!
//! ## Example
//!
//! ```ignore
//! use relayprobe_client::{node_at, RelayStore, SyncProbe, ProbeConfig};
//! use relayprobe_types::{NodePath, TestRecord};
//!
//! let store = RelayStore::connect("ws://127.0.0.1:8765/ws").await?;
//! let node = node_at(&store, &NodePath::parse("test/data")?).unwrap();
//!
//! let record = TestRecord::new(TestRecord::DEFAULT_MESSAGE, "alice");
//! let outcome = SyncProbe::new(ProbeConfig::default())
//!     .run(&node, record.to_value()?)
//!     .await?;
//! assert!(record.matches(&outcome.value));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;
pub mod identity;
pub mod probe;
pub mod store;

pub use harness::{Harness, HarnessConfig, HarnessReport, Stage, StageResult, StageStatus};
pub use identity::{
    AuthEvent, AuthOutcome, CurrentUser, HashParams, IdentityError, IdentityService, MemoryIdentity,
};
pub use probe::{
    ProbeConfig, ProbeError, ProbeOrder, ProbeOutcome, SyncProbe, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
pub use store::{
    node_at, AckCallback, GraphNode, GraphStore, Listener, MemoryNode, MemoryStore, RelayNode,
    RelayStore, RelayStoreConfig, StoreError, Unsubscribe,
};
