//! Health Check and Metrics Endpoint
//!
//! Served on `server.port` next to the notification WebSocket.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the registry link, broker and hub
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (registry connected, consumers running)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /ws/notifications` - browser notification socket

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broker::BrokerManager;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::notifications::{self, HubStats, SharedNotificationHub};
use crate::infrastructure::registry::{ConnectionState, RegistryWsClient};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Registry WebSocket state.
    pub registry: RegistryStatus,
    /// Broker consumers state.
    pub broker: BrokerStatus,
    /// Notification hub counters.
    pub notifications: HubStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Registry connected and consumers running.
    Healthy,
    /// One of the two is down.
    Degraded,
    /// Both are down.
    Unhealthy,
}

/// Registry link status.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    /// Connection state label.
    pub state: &'static str,
    /// Whether the socket is open.
    pub connected: bool,
}

/// Broker status.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatus {
    /// Whether the consumers have been started.
    pub consumers_running: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health routes.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<RegistryWsClient>,
    broker: Arc<BrokerManager>,
    hub: SharedNotificationHub,
}

impl HealthServerState {
    /// Create health state over the running components.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<RegistryWsClient>,
        broker: Arc<BrokerManager>,
        hub: SharedNotificationHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            broker,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// HTTP server for health, metrics and notifications.
pub struct HealthServer {
    host: String,
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create the server.
    #[must_use]
    pub const fn new(
        host: String,
        port: u16,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(host = %self.host, port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// All routes: health probes, metrics and the notification socket.
pub fn router(state: Arc<HealthServerState>) -> Router {
    let hub = Arc::clone(&state.hub);
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(notifications::router(hub))
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.registry.is_connected() && state.broker.is_running() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.registry.connection_state();
    let registry = RegistryStatus {
        state: connection.as_str(),
        connected: connection == ConnectionState::Connected,
    };
    let broker = BrokerStatus {
        consumers_running: state.broker.is_running(),
    };

    HealthResponse {
        status: determine_health_status(registry.connected, broker.consumers_running),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        registry,
        broker,
        notifications: state.hub.stats(),
    }
}

const fn determine_health_status(registry_connected: bool, consumers_running: bool) -> HealthStatus {
    match (registry_connected, consumers_running) {
        (true, true) => HealthStatus::Healthy,
        (false, false) => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::config::{DittoSettings, KafkaSettings};
    use crate::infrastructure::notifications::NotificationHub;
    use crate::infrastructure::registry::RegistryWsConfig;

    fn state() -> Arc<HealthServerState> {
        let config = RegistryWsConfig::from_settings(&DittoSettings::default()).unwrap();
        let registry = Arc::new(RegistryWsClient::new(config, CancellationToken::new()));
        let broker = Arc::new(BrokerManager::new(&KafkaSettings::default()).unwrap());
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            registry,
            broker,
            Arc::new(NotificationHub::new()),
        ))
    }

    async fn get(path: &str) -> (StatusCode, String) {
        let response = router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test_case(true, true, HealthStatus::Healthy)]
    #[test_case(true, false, HealthStatus::Degraded)]
    #[test_case(false, true, HealthStatus::Degraded)]
    #[test_case(false, false, HealthStatus::Unhealthy)]
    fn status_from_components(registry: bool, broker: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(registry, broker), expected);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(get("/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn not_ready_before_start() {
        let (status, body) = get("/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn health_reports_components() {
        let (status, body) = get("/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["registry"]["state"], "disconnected");
        assert_eq!(json["broker"]["consumers_running"], false);
        assert_eq!(json["notifications"]["clients"], 0);
    }

    #[tokio::test]
    async fn notification_route_requires_upgrade() {
        let (status, _) = get("/ws/notifications?user_id=1").await;
        assert!(status.is_client_error());
    }
}
