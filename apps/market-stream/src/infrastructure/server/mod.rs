//! Downstream HTTP Server
//!
//! WebSocket sessions for downstream subscribers plus the realtime status
//! query.
//!
//! # Endpoints
//!
//! - `GET /api/market/ws` (alias `/ws`) - WebSocket client protocol
//! - `GET /api/market/realtime` - Upstream connector status

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::Supervisor;
use crate::infrastructure::broadcast::{Broadcaster, ClientHandle};

/// Client JSON protocol.
pub mod protocol;

/// Per-client WebSocket session.
pub mod session;

/// Realtime status query.
pub mod status;

/// Supervisor specialised to downstream client handles.
pub type MarketSupervisor = Supervisor<ClientHandle>;

// =============================================================================
// Server State
// =============================================================================

/// Shared state for downstream handlers.
pub struct ServerState {
    supervisor: Arc<MarketSupervisor>,
    broadcaster: Arc<Broadcaster>,
    queue_capacity: usize,
}

impl ServerState {
    /// Create server state.
    #[must_use]
    pub const fn new(
        supervisor: Arc<MarketSupervisor>,
        broadcaster: Arc<Broadcaster>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            supervisor,
            broadcaster,
            queue_capacity,
        }
    }

    /// Connection lifecycle supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Arc<MarketSupervisor> {
        &self.supervisor
    }

    /// Fan-out broadcaster.
    #[must_use]
    pub const fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Per-client outbound queue capacity.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Build the downstream router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/market/ws", get(session::ws_handler))
        .route("/ws", get(session::ws_handler))
        .route("/api/market/realtime", get(status::realtime_handler))
        .with_state(state)
}

// =============================================================================
// Market Server
// =============================================================================

/// Downstream HTTP server.
pub struct MarketServer {
    port: u16,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl MarketServer {
    /// Create a new market server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Market stream server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Market stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Downstream server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
