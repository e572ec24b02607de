#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream - Real-time Market Data Fan-out
//!
//! Keeps one persistent upstream WebSocket per venue (Alpaca equities,
//! Binance crypto), normalizes venue frames into canonical events, and
//! fans them out to downstream WebSocket clients by symbol.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types and logic, no I/O
//!   - `streaming`: Canonical events and the venue frame normalizer
//!   - `subscription`: Connection <-> symbol registry
//!   - `connector`: Connector lifecycle and accumulated symbols
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `UpstreamConnector` and `EventSink`
//!   - `services`: Connection lifecycle supervisor, reconnect policy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `venue`: WebSocket connectors for each venue
//!   - `broadcast`: Fan-out to per-client outbound queues
//!   - `server`: Downstream WebSocket sessions and status query
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Alpaca WS  --+                                    +--> Client 1
//!              +--> Normalizer --> Broadcaster -----+--> Client 2
//! Binance WS --+                       ^            +--> Client N
//!                                      |
//!                        Subscription Registry <-- Supervisor <-- client requests
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connector::{ConnectorLifecycle, ConnectorSnapshot, ConnectorState};
pub use domain::streaming::normalize::{DecodeError, Normalizer, normalize};
pub use domain::streaming::{CanonicalEvent, Quote, Symbol, Ticker, Trade, Venue, VenueTimestamp};
pub use domain::subscription::{ConnectionId, RegistryError, SubscriptionRegistry};

// Application
pub use application::ports::{ConnectionError, Disconnect, EventSink, UpstreamConnector};
pub use application::services::{ReconnectConfig, Supervisor, SupervisorError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, MarketStreamConfig};

// Venue connectors
pub use infrastructure::venue::{
    AlpacaAdapter, BinanceAdapter, ConnectorConfig, CryptoConnector, EquityConnector,
    HeartbeatConfig, VenueConnector,
};

// Fan-out and downstream server
pub use infrastructure::broadcast::{Broadcaster, ClientHandle, ClientRegistry};
pub use infrastructure::server::{MarketServer, MarketSupervisor, ServerError, ServerState};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
