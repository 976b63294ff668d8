//! Connection and message limits for relayprobe-relay.
//!
//! - **Connections**: a semaphore sized by `limits.max_connections`. Each
//!   WebSocket session holds one permit for its lifetime; upgrades that find
//!   no free permit are refused with `503 Service Unavailable`.
//! - **Messages**: governor rate limiters, one keyed by session id and one
//!   global across all sessions.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limits for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Frames per session.
    message_limiter: Arc<KeyedLimiter<u64>>,

    /// Frames across all sessions.
    global_limiter: Arc<DirectLimiter>,

    /// One permit per open WebSocket session.
    connections: Arc<Semaphore>,

    max_connections: usize,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<u64>")
            .field("global_limiter", &"DirectLimiter")
            .field("max_connections", &self.max_connections)
            .field("available_connections", &self.connections.available_permits())
            .finish()
    }
}

impl RateLimits {
    /// Create limiters from configuration.
    ///
    /// Zero quotas are clamped to one; [`Config::validate`] rejects them
    /// before this point.
    ///
    /// [`Config::validate`]: crate::config::Config::validate
    pub fn new(config: &LimitsConfig) -> Self {
        let messages_per_minute = NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_rps = NonZeroU32::new(config.global_requests_per_second).unwrap_or(NonZeroU32::MIN);
        let max_connections = config.max_connections.max(1);

        Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
            connections: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Claim a connection slot, or `None` at capacity.
    ///
    /// The slot is released when the permit is dropped.
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        self.connections.clone().try_acquire_owned().ok()
    }

    /// Number of sessions currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connections.available_permits()
    }

    /// Configured connection capacity.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Check if a session may send another frame.
    pub fn check_message(&self, session_id: u64) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)?;
        self.message_limiter
            .check_key(&session_id)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Number of tracked session keys.
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict limiter entries of idle sessions.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many frames from this session.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Too many frames across all sessions.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
