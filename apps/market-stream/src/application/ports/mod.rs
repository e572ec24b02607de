//! Port Interfaces
//!
//! Contracts between the supervisor and the infrastructure adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamConnector`]: one persistent connection to a market data venue
//! - [`EventSink`]: where normalized events go (the fan-out broadcaster)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::connector::ConnectorState;
use crate::domain::streaming::{CanonicalEvent, Symbol, Venue};

// =============================================================================
// Errors
// =============================================================================

/// Upstream handshake or transport failure.
///
/// Always handled by the supervisor's reconnect loop; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Transport-level failure (DNS, TCP, TLS, WebSocket).
    #[error("transport error: {0}")]
    Transport(String),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Venue rejected our credentials or session.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Venue closed the connection during the handshake.
    #[error("connection closed by venue")]
    Closed,

    /// No transport is currently established.
    #[error("not connected")]
    NotConnected,

    /// Outbound request could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

/// Why a receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Venue sent a close frame or the stream ended.
    Closed(Option<String>),
    /// No frame arrived within the read timeout.
    ReadTimeout(Duration),
    /// Transport error while reading or writing.
    Transport(String),
    /// `run` was called without a transport.
    NotConnected,
}

impl std::fmt::Display for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(Some(reason)) => write!(f, "closed by venue: {reason}"),
            Self::Closed(None) => f.write_str("closed by venue"),
            Self::ReadTimeout(after) => write!(f, "no data for {after:?}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::NotConnected => f.write_str("not connected"),
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Receives normalized events from a connector's receive loop.
///
/// Called synchronously on the ingestion path; implementations must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event to interested subscribers.
    fn publish(&self, event: CanonicalEvent);
}

/// A single persistent upstream venue connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Venue served by this connector.
    fn venue(&self) -> Venue;

    /// Shared lifecycle and accumulated-symbol state.
    fn state(&self) -> Arc<ConnectorState>;

    /// Establish the transport and complete any venue handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the handshake fails or times out.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Send a venue-formatted subscription request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] without a transport, or a
    /// transport error if the write fails.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), ConnectionError>;

    /// Receive loop. Returns when the transport closes or goes silent.
    async fn run(&self, sink: Arc<dyn EventSink>) -> Disconnect;

    /// Close the transport if one is open.
    async fn disconnect(&self);
}
