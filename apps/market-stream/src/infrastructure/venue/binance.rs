//! Binance Crypto Venue
//!
//! Raw-stream endpoint carrying 24h ticker payloads. No authentication;
//! subscriptions are live-stream `SUBSCRIBE` requests with an incrementing id.
//!
//! # Stream URL
//!
//! - `wss://stream.binance.com:9443/ws`

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::connector::VenueAdapter;
use crate::application::ports::ConnectionError;
use crate::domain::streaming::normalize::crypto::stream_name;
use crate::domain::streaming::normalize::{DecodeError, Normalizer};
use crate::domain::streaming::{CanonicalEvent, Symbol, Venue};

/// Default Binance raw-stream endpoint.
pub const DEFAULT_CRYPTO_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Live-stream subscription request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@ticker"], "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always `SUBSCRIBE`.
    pub method: &'static str,
    /// Stream names.
    pub params: Vec<String>,
    /// Request id echoed in the venue's acknowledgement.
    pub id: u64,
}

/// Binance venue adapter.
#[derive(Debug)]
pub struct BinanceAdapter {
    url: String,
    normalizer: Normalizer,
    next_id: AtomicU64,
}

impl BinanceAdapter {
    /// Create an adapter for `url` that restores symbols with `normalizer`.
    #[must_use]
    pub fn new(url: impl Into<String>, normalizer: Normalizer) -> Self {
        Self {
            url: url.into(),
            normalizer,
            next_id: AtomicU64::new(1),
        }
    }

    /// Build the next subscription request.
    #[must_use]
    pub fn request(&self, symbols: &[Symbol]) -> SubscribeRequest {
        SubscribeRequest {
            method: "SUBSCRIBE",
            params: symbols.iter().map(|s| stream_name(s)).collect(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Crypto
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn subscribe_request(&self, symbols: &[Symbol]) -> Result<String, ConnectionError> {
        serde_json::to_string(&self.request(symbols))
            .map_err(|e| ConnectionError::Encode(e.to_string()))
    }

    fn decode(&self, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
        self.normalizer.normalize(Venue::Crypto, frame)
    }
}
