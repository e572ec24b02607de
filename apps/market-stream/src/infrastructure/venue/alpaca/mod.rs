//! Alpaca Equities Venue
//!
//! Stock trades and quotes over Alpaca's market data WebSocket, with the
//! connect/auth handshake run inside the connector's handshake timeout.

/// Venue adapter (URL, handshake, subscribe, decode).
pub mod adapter;

/// Authentication state machine and credentials.
pub mod auth;

/// Control message wire types.
pub mod messages;

pub use adapter::{AlpacaAdapter, DataFeed};
pub use auth::{AuthError, Credentials};
