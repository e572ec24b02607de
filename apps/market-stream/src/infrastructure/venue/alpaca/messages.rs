//! Alpaca WebSocket Control Messages
//!
//! Wire types for the parts of the stock stream protocol the connector itself
//! speaks: the connect/auth handshake and subscribe requests. Market data
//! frames go through the equities normalizer instead.
//!
//! # Control Messages
//! - `Success`: connection or authentication acknowledgement
//! - `Error`: error response with code and message
//!
//! # Outbound
//! - `AuthRequest`: `{"action":"auth","key":..,"secret":..}`
//! - `SubscriptionRequest`: `{"action":"subscribe","trades":[..],"quotes":[..]}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::streaming::Symbol;

// =============================================================================
// Inbound Control Messages
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuccessMessage {
    /// Success message: "connected" or "authenticated"
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Initial connection established
    Connected,
    /// Authentication successful
    Authenticated,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub code: i32,

    /// Error message
    #[serde(default)]
    pub msg: String,
}

/// Control message discriminated by the `T` field.
///
/// Data messages and anything unrecognized land in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "T", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Connection/authentication success
    Success(SuccessMessage),
    /// Error message
    Error(ErrorMessage),
    /// Any other message type
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ControlMessage>),
    One(ControlMessage),
}

/// Parse a frame holding one control message or an array of them.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the frame is not a message object or array.
pub fn parse_control(frame: &str) -> Result<Vec<ControlMessage>, serde_json::Error> {
    Ok(match serde_json::from_str(frame)? {
        OneOrMany::Many(messages) => messages,
        OneOrMany::One(message) => vec![message],
    })
}

/// `T:"error"` entries of an already-parsed frame. Other entries are skipped.
#[must_use]
pub fn stream_errors(frame: &Value) -> Vec<ErrorMessage> {
    let entries = match frame {
        Value::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };
    entries
        .iter()
        .filter(|entry| entry.get("T").and_then(Value::as_str) == Some("error"))
        .filter_map(|entry| ErrorMessage::deserialize(entry).ok())
        .collect()
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Authentication request for market data streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscription request for the stock stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe"
    pub action: &'static str,

    /// Trade symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<Symbol>,

    /// Quote symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<Symbol>,
}

impl SubscriptionRequest {
    /// Subscribe to trades and quotes for the same symbols.
    #[must_use]
    pub fn trades_and_quotes(symbols: &[Symbol]) -> Self {
        Self {
            action: "subscribe",
            trades: symbols.to_vec(),
            quotes: symbols.to_vec(),
        }
    }
}
