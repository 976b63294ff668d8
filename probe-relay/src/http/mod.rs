//! HTTP endpoints for relayprobe-relay.
//!
//! - `GET /health` - liveness probe
//! - `GET /ws` - WebSocket upgrade into a relay session

pub mod health;

use crate::server::Relay;
use crate::session;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Extension, Router};
use relayprobe_types::MAX_FRAME_SIZE;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ws", get(ws_handler))
        .layer(Extension(relay))
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// On shutdown the listener stops accepting and in-flight connections are
/// allowed to finish.
pub async fn serve<F>(relay: Arc<Relay>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown)
        .await
}

/// WebSocket upgrade handler.
///
/// Capacity is checked before the upgrade so a full relay answers `503`.
async fn ws_handler(
    Extension(relay): Extension<Arc<Relay>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(permit) = relay.rate_limits().try_admit() else {
        relay
            .metrics()
            .connections_rejected
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            "Connection limit reached ({}), rejecting upgrade",
            relay.rate_limits().max_connections()
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    match ws {
        Ok(ws) => ws
            .max_message_size(MAX_FRAME_SIZE)
            .max_frame_size(MAX_FRAME_SIZE)
            .on_upgrade(move |socket| session::run(relay, socket, permit)),
        Err(rejection) => rejection.into_response(),
    }
}
