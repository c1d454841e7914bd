//! Liveness and readiness endpoints for a board node.
//!
//! - `GET /health` - 200 while the process can answer at all
//! - `GET /ready` - 200 only while the node accepts sockets and its cluster
//!   bus subscription is up, 503 otherwise; the body reports both flags
//!
//! Startup marks the node accepting once the store, bus and heartbeat are
//! up. Shutdown clears the flag before sockets are drained so the load
//! balancer stops routing new joins here. The Redis bus clears
//! `bus_connected` while it resubscribes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Readiness inputs shared between startup, shutdown and the cluster bus.
#[derive(Debug)]
pub struct HealthState {
    accepting: AtomicBool,
    bus_connected: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Not accepting yet; the bus counts as connected until it says otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accepting: AtomicBool::new(false),
            bus_connected: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn set_bus_connected(&self, connected: bool) {
        let was = self.bus_connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            info!(
                target: "board.node",
                bus_connected = connected,
                "Cluster bus readiness changed"
            );
        }
    }

    #[must_use]
    pub fn is_bus_connected(&self) -> bool {
        self.bus_connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::SeqCst) && self.is_bus_connected()
    }

    fn report(&self) -> ReadinessReport {
        ReadinessReport {
            accepting_sockets: self.accepting.load(Ordering::SeqCst),
            bus_connected: self.is_bus_connected(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessReport {
    accepting_sockets: bool,
    bus_connected: bool,
}

/// Router serving `/health` and `/ready`. Metrics are merged in separately.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessReport>) {
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(state.report()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_ready(state: &Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("Failed to build request");
        let response = health_router(Arc::clone(state))
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn status_of(uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        health_router(Arc::new(HealthState::new()))
            .oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[tokio::test]
    async fn test_liveness_does_not_wait_for_startup() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_node_is_not_ready_before_startup_completes() {
        let state = Arc::new(HealthState::new());
        let (status, body) = get_ready(&state).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["acceptingSockets"], false);
        assert_eq!(body["busConnected"], true);
    }

    #[tokio::test]
    async fn test_shutdown_drains_before_bus_goes_away() {
        let state = Arc::new(HealthState::new());
        state.set_ready();
        assert_eq!(get_ready(&state).await.0, StatusCode::OK);

        // Shutdown flips readiness while the bus is still connected.
        state.set_not_ready();
        let (status, body) = get_ready(&state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["busConnected"], true);
    }

    #[tokio::test]
    async fn test_lost_bus_subscription_takes_node_out_of_rotation() {
        let state = Arc::new(HealthState::new());
        state.set_ready();

        state.set_bus_connected(false);
        let (status, body) = get_ready(&state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["acceptingSockets"], true);
        assert_eq!(body["busConnected"], false);

        state.set_bus_connected(true);
        assert_eq!(get_ready(&state).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_are_not_served_by_health_router() {
        assert_eq!(status_of("/metrics").await, StatusCode::NOT_FOUND);
    }
}
