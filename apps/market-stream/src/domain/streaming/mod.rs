//! Market Data Streaming Types
//!
//! Canonical, venue-neutral representation of one market data update.
//! Every upstream venue is normalized into [`CanonicalEvent`] before it
//! reaches the broadcaster, so downstream clients never see venue wire
//! formats.
//!
//! # Wire Format (downstream JSON)
//!
//! ```json
//! {"type":"ticker","symbol":"BTC/USDT","price":42000.5,"volume_24h":1000.2,"change_24h":3.1,"timestamp":1700000000000}
//! {"type":"trade","symbol":"AAPL","price":189.1,"size":null,"timestamp":"2024-01-02T14:30:00Z"}
//! {"type":"quote","symbol":"AAPL","bid":189.0,"ask":189.2,"bid_size":3,"ask_size":5,"timestamp":"2024-01-02T14:30:00Z"}
//! ```
//!
//! Numeric fields are `Option<Decimal>`: a field the venue omitted or sent
//! in an unparseable form is `null`, never zero.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Message normalization from venue payloads to canonical events.
pub mod normalize;

/// Market symbol in venue-neutral form (`"BTC/USDT"`, `"AAPL"`).
pub type Symbol = String;

/// Subscription marker meaning "every symbol".
pub const WILDCARD: &str = "*";

// =============================================================================
// Venue
// =============================================================================

/// Upstream market data venue, keyed by asset class.
///
/// Serialized as the downstream `asset_type` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Equities feed (Alpaca SIP/IEX trades and quotes).
    #[default]
    Equity,
    /// Crypto feed (Binance 24h tickers).
    Crypto,
}

impl Venue {
    /// All venues, in status-report order.
    pub const ALL: [Self; 2] = [Self::Equity, Self::Crypto];

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Crypto => "crypto",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timestamp
// =============================================================================

/// Upstream-provided event time, passed through without clock correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VenueTimestamp {
    /// Epoch milliseconds (crypto venue).
    EpochMillis(i64),
    /// Venue-formatted text, typically RFC-3339 (equities venue).
    Text(String),
}

// =============================================================================
// Canonical Events
// =============================================================================

/// 24-hour rolling ticker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Symbol in `BASE/QUOTE` form.
    pub symbol: Symbol,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
    /// Rolling 24h base-asset volume.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub volume_24h: Option<Decimal>,
    /// Rolling 24h price change in percent.
    #[serde(rename = "change_24h", with = "rust_decimal::serde::float_option")]
    pub change_24h_pct: Option<Decimal>,
    /// Venue event time.
    pub timestamp: Option<VenueTimestamp>,
}

/// Last-sale trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Trade price.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
    /// Trade size.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub size: Option<Decimal>,
    /// Venue event time.
    pub timestamp: Option<VenueTimestamp>,
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Best bid price.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask price.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Size at the best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid_size: Option<Decimal>,
    /// Size at the best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask_size: Option<Decimal>,
    /// Venue event time.
    pub timestamp: Option<VenueTimestamp>,
}

/// Normalized market data event, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanonicalEvent {
    /// 24h ticker (crypto).
    Ticker(Ticker),
    /// Trade (equities).
    Trade(Trade),
    /// Quote (equities).
    Quote(Quote),
}

impl CanonicalEvent {
    /// Symbol this event belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(t) => &t.symbol,
            Self::Trade(t) => &t.symbol,
            Self::Quote(q) => &q.symbol,
        }
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ticker(_) => EventKind::Ticker,
            Self::Trade(_) => EventKind::Trade,
            Self::Quote(_) => EventKind::Quote,
        }
    }

    /// Venue-provided timestamp, if any.
    #[must_use]
    pub const fn timestamp(&self) -> Option<&VenueTimestamp> {
        match self {
            Self::Ticker(t) => t.timestamp.as_ref(),
            Self::Trade(t) => t.timestamp.as_ref(),
            Self::Quote(q) => q.timestamp.as_ref(),
        }
    }
}

/// Discriminant of a [`CanonicalEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 24h ticker.
    Ticker,
    /// Trade.
    Trade,
    /// Quote.
    Quote,
}

impl EventKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Quote => "quote",
        }
    }
}
