//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connector status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks connectors)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::connector::{ConnectorLifecycle, ConnectorSnapshot};
use crate::domain::streaming::Venue;
use crate::infrastructure::broadcast::BroadcastStatsSnapshot;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::server::ServerState;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connector status.
    pub feeds: FeedsStatus,
    /// Downstream client status.
    pub clients: ClientStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both connectors running.
    Healthy,
    /// One connector up.
    Degraded,
    /// No connector up.
    Unhealthy,
}

/// Upstream connector status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedsStatus {
    /// Equities feed.
    pub equity: FeedInfo,
    /// Crypto feed.
    pub crypto: FeedInfo,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Lifecycle.
    pub state: ConnectorLifecycle,
    /// Whether the receive loop is active.
    pub running: bool,
    /// Messages received count.
    pub messages_received: u64,
    /// Current reconnect attempts (0 once running).
    pub reconnect_attempts: u32,
    /// Accumulated upstream symbol count.
    pub subscribed_symbols: usize,
}

impl From<&ConnectorSnapshot> for FeedInfo {
    fn from(snapshot: &ConnectorSnapshot) -> Self {
        Self {
            state: snapshot.status,
            running: snapshot.status == ConnectorLifecycle::Running,
            messages_received: snapshot.messages_received,
            reconnect_attempts: snapshot.reconnect_attempts,
            subscribed_symbols: snapshot.subscribed_symbols.len(),
        }
    }
}

/// Downstream client information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Registered WebSocket clients.
    pub total: usize,
    /// Fan-out counters.
    pub broadcast: BroadcastStatsSnapshot,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    server: Arc<ServerState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, server: Arc<ServerState>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            server,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
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
    let response = build_health_response(&state);

    if response.feeds.equity.running || response.feeds.crypto.running {
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let supervisor = state.server.supervisor();
    let feed = |venue| {
        supervisor
            .snapshot(venue)
            .map_or_else(FeedInfo::disconnected, |snapshot| FeedInfo::from(&snapshot))
    };
    let feeds = FeedsStatus {
        equity: feed(Venue::Equity),
        crypto: feed(Venue::Crypto),
    };

    HealthResponse {
        status: determine_health_status(&feeds.equity, &feeds.crypto),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds,
        clients: ClientStatus {
            total: supervisor.client_count(),
            broadcast: state.server.broadcaster().stats(),
        },
    }
}

impl FeedInfo {
    fn disconnected() -> Self {
        Self {
            state: ConnectorLifecycle::Disconnected,
            running: false,
            messages_received: 0,
            reconnect_attempts: 0,
            subscribed_symbols: 0,
        }
    }
}

fn determine_health_status(equity: &FeedInfo, crypto: &FeedInfo) -> HealthStatus {
    if equity.running && crypto.running {
        return HealthStatus::Healthy;
    }
    if equity.state.is_up() || crypto.state.is_up() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
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
