//! Downstream Client Protocol
//!
//! JSON messages exchanged with downstream WebSocket clients.
//!
//! # Client -> Server
//! ```json
//! {"action": "subscribe", "symbols": ["BTC/USDT"], "asset_type": "crypto"}
//! {"action": "unsubscribe", "symbols": ["BTC/USDT"]}
//! ```
//!
//! # Server -> Client
//! ```json
//! {"type": "subscribed", "symbols": ["BTC/USDT"]}
//! {"type": "unsubscribed", "symbols": ["BTC/USDT"]}
//! {"type": "market_data", "symbol": "BTC/USDT", "data": {"type": "ticker", ...}}
//! {"type": "error", "message": "..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{CanonicalEvent, Symbol, Venue};

/// Request from a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Add symbols on one venue.
    Subscribe {
        /// Requested symbols; `"*"` means everything.
        #[serde(default)]
        symbols: Vec<Symbol>,
        /// Venue, `equity` unless stated.
        #[serde(default)]
        asset_type: Venue,
    },
    /// Remove symbols.
    Unsubscribe {
        /// Symbols to drop.
        #[serde(default)]
        symbols: Vec<Symbol>,
    },
}

impl ClientMessage {
    /// Parse a client text frame.
    ///
    /// # Errors
    ///
    /// Returns a message suitable for a `{"type":"error"}` reply.
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid request: {e}"))
    }
}

/// Message to a downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscribe acknowledgement.
    Subscribed {
        /// Symbols applied.
        symbols: Vec<Symbol>,
    },
    /// Unsubscribe acknowledgement, also sent before an eviction close.
    Unsubscribed {
        /// Symbols removed.
        symbols: Vec<Symbol>,
    },
    /// One market data event.
    MarketData {
        /// Event symbol.
        symbol: Symbol,
        /// Canonical event.
        data: CanonicalEvent,
    },
    /// Request-level error; the connection stays open.
    Error {
        /// Description.
        message: String,
    },
}

impl ServerMessage {
    /// Wrap an event for delivery.
    #[must_use]
    pub fn market_data(event: CanonicalEvent) -> Self {
        Self::MarketData {
            symbol: event.symbol().to_string(),
            data: event,
        }
    }

    /// Error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::{Trade, VenueTimestamp};
    use rust_decimal::Decimal;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn subscribe_defaults_to_equity() {
        assert_eq!(
            ClientMessage::parse(r#"{"action":"subscribe","symbols":["AAPL"]}"#),
            Ok(ClientMessage::Subscribe {
                symbols: vec!["AAPL".to_string()],
                asset_type: Venue::Equity,
            })
        );
    }

    #[test]
    fn subscribe_crypto() {
        assert_eq!(
            ClientMessage::parse(
                r#"{"action":"subscribe","symbols":["BTC/USDT"],"asset_type":"crypto"}"#
            ),
            Ok(ClientMessage::Subscribe {
                symbols: vec!["BTC/USDT".to_string()],
                asset_type: Venue::Crypto,
            })
        );
    }

    #[test]
    fn unsubscribe_ignores_asset_type() {
        assert_eq!(
            ClientMessage::parse(
                r#"{"action":"unsubscribe","symbols":["AAPL"],"asset_type":"equity"}"#
            ),
            Ok(ClientMessage::Unsubscribe {
                symbols: vec!["AAPL".to_string()],
            })
        );
    }

    #[test_case(r#"{"action":"ping"}"# ; "unknown action")]
    #[test_case(r#"{"action":"subscribe","asset_type":"forex"}"# ; "unknown asset type")]
    #[test_case(r#"{"symbols":["AAPL"]}"# ; "missing action")]
    #[test_case("not json" ; "malformed")]
    fn rejects_bad_requests(frame: &str) {
        let err = ClientMessage::parse(frame).unwrap_err();
        assert!(err.starts_with("invalid request"), "{err}");
    }

    #[test]
    fn market_data_envelope() {
        let message = ServerMessage::market_data(CanonicalEvent::Trade(Trade {
            symbol: "AAPL".to_string(),
            price: Some(Decimal::new(18910, 2)),
            size: None,
            timestamp: Some(VenueTimestamp::Text("2024-01-02T14:30:00Z".to_string())),
        }));

        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "market_data",
                "symbol": "AAPL",
                "data": {
                    "type": "trade",
                    "symbol": "AAPL",
                    "price": 189.1,
                    "size": null,
                    "timestamp": "2024-01-02T14:30:00Z"
                }
            })
        );
    }

    #[test]
    fn acks_and_errors() {
        assert_eq!(
            ServerMessage::Subscribed {
                symbols: vec!["AAPL".to_string()]
            }
            .to_json()
            .unwrap(),
            r#"{"type":"subscribed","symbols":["AAPL"]}"#
        );
        assert_eq!(
            ServerMessage::error("nope").to_json().unwrap(),
            r#"{"type":"error","message":"nope"}"#
        );
    }
}
