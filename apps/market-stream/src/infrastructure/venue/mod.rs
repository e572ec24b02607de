//! Venue Connectors
//!
//! [`VenueConnector`] owns the WebSocket transport and receive loop; each
//! venue plugs in a [`VenueAdapter`] for its URL, handshake, subscribe frame
//! and decoding.

/// Equities venue (Alpaca).
pub mod alpaca;

/// Crypto venue (Binance).
pub mod binance;

/// Generic WebSocket connector.
pub mod connector;

/// Ping and read-timeout supervision.
pub mod heartbeat;

pub use alpaca::AlpacaAdapter;
pub use binance::BinanceAdapter;
pub use connector::{ConnectorConfig, DEFAULT_WRITE_TIMEOUT, VenueAdapter, VenueConnector};
pub use heartbeat::HeartbeatConfig;

/// Connector for the equities venue.
pub type EquityConnector = VenueConnector<AlpacaAdapter>;

/// Connector for the crypto venue.
pub type CryptoConnector = VenueConnector<BinanceAdapter>;
