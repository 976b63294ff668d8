//! Background housekeeping for the relay.
//!
//! Periodically evicts rate limiter entries of idle sessions and logs a
//! one-line activity summary.

use crate::server::Relay;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Default housekeeping interval.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the housekeeping task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(relay: Arc<Relay>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Cleanup task started (interval: {}s)", every.as_secs());

        let mut timer = interval(every);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;
            run_once(&relay).await;
        }
    })
}

async fn run_once(relay: &Relay) {
    relay.rate_limits().shrink();

    let nodes = match relay.storage().node_count().await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("Cleanup: node count failed: {}", e);
            return;
        }
    };
    let m = relay.metrics();
    tracing::debug!(
        "Relay: {} sessions, {} nodes, {} puts, {} pushes ({} dropped), {} rejected, {} slow closed",
        relay.active_connections(),
        nodes,
        m.puts_total.load(Ordering::Relaxed),
        m.pushes_total.load(Ordering::Relaxed),
        m.pushes_dropped.load(Ordering::Relaxed),
        m.connections_rejected.load(Ordering::Relaxed),
        m.slow_sessions_closed.load(Ordering::Relaxed),
    );
}
