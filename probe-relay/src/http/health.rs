//! Health check endpoint.

use axum::Json;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "relayprobe-relay";

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Response time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HealthStatus {
    /// A healthy status stamped with the current time.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(
            json,
            r#"{"status":"ok","service":"relayprobe-relay","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn ok_is_stamped_now() {
        let status = HealthStatus::ok();
        assert_eq!(status.status, "ok");
        assert!(status.timestamp > 1_600_000_000_000);
    }
}
