//! Board Service
//!
//! Socket node of the collaborative whiteboard backend.
//!
//! # Servers
//!
//! - WebSocket gateway for clients (default: 0.0.0.0:3002)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8082)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Redis, or fall back to the in-process store
//! 4. Build the node and start heartbeat, bus listener and sweep
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start the WebSocket gateway and mark ready
//! 7. Wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready
//! 2. Stop accepting sockets
//! 3. Clear node-owned cluster state and delete the heartbeat key
//! 4. Cancel background tasks

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use board_service::auth::JwtAuthenticator;
use board_service::config::Config;
use board_service::gateway::gateway_router;
use board_service::node::{BoardNode, NodeSettings};
use board_service::observability::{health_router, init_metrics_recorder, HealthState};
use board_service::recording::LoggingCaptureBackend;
use board_service::store::{DistributedState, RedisBackend};
use board_service::transport::{ClusterBus, MemoryBus, RedisBus};
use common::secret::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for background tasks to finish after cancellation.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "board_service=debug,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Board Service");
    info!(
        node_id = %config.node_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        heartbeat_ttl_ms = config.heartbeat_ttl_ms,
        forward_timeout_ms = config.forward_timeout_ms,
        redis = config.redis_url.is_some(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    // Store and bus share one Redis client when configured
    let (state, bus): (DistributedState, Arc<dyn ClusterBus>) = match &config.redis_url {
        Some(redis_url) => {
            info!("Connecting to Redis...");
            let backend = RedisBackend::connect(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?;
            info!("Redis connection established");
            let bus: Arc<dyn ClusterBus> = Arc::new(
                RedisBus::from_backend(&backend).with_health(Arc::clone(&health_state)),
            );
            (DistributedState::new(Arc::new(backend)), bus)
        }
        None => {
            warn!("REDIS_URL not set, using in-process state; this node cannot share rooms");
            let bus: Arc<dyn ClusterBus> = Arc::new(MemoryBus::new());
            (DistributedState::in_memory(), bus)
        }
    };

    let node = Arc::new(BoardNode::new(
        NodeSettings::from_config(&config),
        state,
        bus,
        Arc::new(LoggingCaptureBackend),
        Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
    ));

    let shutdown_token = CancellationToken::new();
    let task_handles = node.start(&shutdown_token).await.map_err(|e| {
        error!(error = %e, "Failed to start board node");
        e
    })?;

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket gateway
    let gateway_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid gateway bind address");
        format!("Invalid gateway bind address: {e}")
    })?;
    let gateway_listener = tokio::net::TcpListener::bind(gateway_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %gateway_addr, "Failed to bind gateway");
            format!("Failed to bind gateway to {gateway_addr}: {e}")
        })?;

    let gateway_app = gateway_router(Arc::clone(&node)).layer(TraceLayer::new_for_http());
    let gateway_stop = CancellationToken::new();
    let gateway_stop_signal = gateway_stop.clone();
    let gateway_task = tokio::spawn(async move {
        info!(addr = %gateway_addr, "Gateway starting");
        let server = axum::serve(gateway_listener, gateway_app).with_graceful_shutdown(async move {
            gateway_stop_signal.cancelled().await;
            info!("Gateway shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Gateway failed");
        }
    });

    health_state.set_ready();
    info!("Board Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops routing here
    health_state.set_not_ready();

    // Stop accepting sockets. Open sockets keep the server future alive, so
    // it is not awaited.
    gateway_stop.cancel();

    node.shutdown().await;

    shutdown_token.cancel();
    for handle in task_handles {
        if tokio::time::timeout(TASK_SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }
    gateway_task.abort();

    info!("Board Service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
#[expect(
    clippy::expect_used,
    reason = "signal handler installation failure at startup is unrecoverable"
)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }
}
