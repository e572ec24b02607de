//! Message Normalizer
//!
//! Pure mapping from venue payload shapes to [`CanonicalEvent`]s. No I/O.
//!
//! - Malformed JSON is a [`DecodeError`]; the caller logs it and moves on.
//! - Well-formed frames of an unrecognized shape (control messages,
//!   subscription acks, heartbeats) yield zero events.
//! - A numeric field that fails to parse is `None`; only an unparseable
//!   symbol drops the payload, with a warning.

use std::str::FromStr;
use std::sync::LazyLock;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{CanonicalEvent, Symbol, Venue, VenueTimestamp, WILDCARD};

/// Crypto (Binance 24h ticker) mapping rules.
pub mod crypto;

/// Equities (Alpaca trade/quote) mapping rules.
pub mod equity;

/// Quote assets recognized when restoring `BASE/QUOTE` crypto symbols.
pub const DEFAULT_QUOTE_ASSETS: &[&str] = &[
    "USDT", "FDUSD", "USDC", "BUSD", "TUSD", "BTC", "ETH", "BNB", "EUR", "TRY",
];

static DEFAULT_NORMALIZER: LazyLock<Normalizer> = LazyLock::new(Normalizer::default);

/// Errors that make a whole frame undecodable.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame could not be read as UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

/// Normalize a frame using the default quote asset table.
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is not valid JSON.
pub fn normalize(venue: Venue, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
    DEFAULT_NORMALIZER.normalize(venue, frame)
}

/// Venue frame normalizer.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Sorted longest first so `FDUSD` wins over a shorter overlapping suffix.
    quote_assets: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE_ASSETS.iter().copied())
    }
}

impl Normalizer {
    /// Create a normalizer recognizing the given crypto quote assets.
    pub fn new<I, S>(quote_assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut quote_assets: Vec<String> = quote_assets
            .into_iter()
            .map(|q| q.as_ref().trim().to_ascii_uppercase())
            .filter(|q| !q.is_empty())
            .collect();
        quote_assets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        quote_assets.dedup();
        Self { quote_assets }
    }

    /// Quote assets in match order.
    #[must_use]
    pub fn quote_assets(&self) -> &[String] {
        &self.quote_assets
    }

    /// Canonical form of a client-requested symbol on `venue`.
    ///
    /// Returns `None` for a blank symbol. The wildcard passes through.
    #[must_use]
    pub fn canonical_symbol(&self, venue: Venue, requested: &str) -> Option<Symbol> {
        let trimmed = requested.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == WILDCARD {
            return Some(WILDCARD.to_string());
        }
        Some(match venue {
            Venue::Crypto => crypto::canonical_symbol(trimmed, &self.quote_assets),
            Venue::Equity => trimmed.to_uppercase(),
        })
    }

    /// Map one raw text frame from `venue` into zero or more events.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] if the frame is not valid JSON.
    pub fn normalize(&self, venue: Venue, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
        let value: Value = serde_json::from_str(frame)?;
        Ok(self.normalize_value(venue, &value))
    }

    /// Map an already-parsed frame from `venue` into zero or more events.
    #[must_use]
    pub fn normalize_value(&self, venue: Venue, value: &Value) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        match venue {
            Venue::Crypto => crypto::collect(value, &self.quote_assets, &mut events),
            Venue::Equity => equity::collect(value, &mut events),
        }
        events
    }
}

// =============================================================================
// Field helpers
// =============================================================================

/// Numeric field accepting JSON numbers and numeric strings.
pub(crate) fn decimal_field(obj: &Map<String, Value>, key: &str) -> Option<Decimal> {
    match obj.get(key)? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Timestamp field passed through in its venue-native form.
pub(crate) fn timestamp_field(obj: &Map<String, Value>, key: &str) -> Option<VenueTimestamp> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().map(VenueTimestamp::EpochMillis),
        Value::String(s) if !s.is_empty() => Some(VenueTimestamp::Text(s.clone())),
        _ => None,
    }
}

/// Non-empty string field.
pub(crate) fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
