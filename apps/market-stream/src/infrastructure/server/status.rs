//! Realtime status query (`GET /api/market/realtime`).

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{MarketSupervisor, ServerState};
use crate::domain::connector::{ConnectorLifecycle, ConnectorSnapshot, ConnectorState};
use crate::domain::streaming::normalize::crypto::stream_name;
use crate::domain::streaming::{Symbol, Venue};

/// Status of both upstream streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeStatus {
    /// Equities connector.
    pub equity_stream: EquityStreamStatus,
    /// Crypto connector.
    pub crypto_stream: CryptoStreamStatus,
}

/// Equities connector status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquityStreamStatus {
    /// Lifecycle.
    pub status: ConnectorLifecycle,
    /// Accumulated upstream symbols.
    pub subscribed_symbols: Vec<Symbol>,
    /// Counters shared by both streams.
    #[serde(flatten)]
    pub counters: StreamCounters,
}

/// Crypto connector status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CryptoStreamStatus {
    /// Lifecycle.
    pub status: ConnectorLifecycle,
    /// Accumulated upstream set as venue stream names.
    pub subscribed_streams: Vec<String>,
    /// Counters shared by both streams.
    #[serde(flatten)]
    pub counters: StreamCounters,
}

/// Reconnect and traffic counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamCounters {
    /// Attempts since the connection last reached `running`.
    pub reconnect_attempts: u32,
    /// Frames received since start.
    pub messages_received: u64,
    /// Last successful handshake.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

impl From<&ConnectorSnapshot> for StreamCounters {
    fn from(snapshot: &ConnectorSnapshot) -> Self {
        Self {
            reconnect_attempts: snapshot.reconnect_attempts,
            messages_received: snapshot.messages_received,
            last_connected_at: snapshot.last_connected_at,
            last_error: snapshot.last_error.clone(),
        }
    }
}

/// Build the status from current connector state.
///
/// A venue without a connector reports as disconnected with nothing subscribed.
#[must_use]
pub fn realtime_status(supervisor: &MarketSupervisor) -> RealtimeStatus {
    let snapshot = |venue| {
        supervisor
            .snapshot(venue)
            .unwrap_or_else(|| ConnectorState::new(venue).snapshot())
    };
    let equity = snapshot(Venue::Equity);
    let crypto = snapshot(Venue::Crypto);

    RealtimeStatus {
        equity_stream: EquityStreamStatus {
            status: equity.status,
            counters: StreamCounters::from(&equity),
            subscribed_symbols: equity.subscribed_symbols,
        },
        crypto_stream: CryptoStreamStatus {
            status: crypto.status,
            counters: StreamCounters::from(&crypto),
            subscribed_streams: crypto
                .subscribed_symbols
                .iter()
                .map(|symbol| stream_name(symbol))
                .collect(),
        },
    }
}

/// Handler for `GET /api/market/realtime`.
pub async fn realtime_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(realtime_status(state.supervisor()))
}
