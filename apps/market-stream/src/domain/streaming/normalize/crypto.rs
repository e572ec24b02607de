//! Binance 24h ticker payloads.
//!
//! Accepted shapes:
//!
//! ```json
//! {"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"42000.50","v":"1000.2","P":"3.1"}}
//! {"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"42000.50","v":"1000.2","P":"3.1"}
//! ```
//!
//! plus arrays of either. Everything else is ignored.

use serde_json::{Map, Value};

use super::{decimal_field, str_field, timestamp_field};
use crate::domain::streaming::{CanonicalEvent, Symbol, Ticker};

const TICKER_EVENT: &str = "24hrTicker";
const TICKER_STREAM_SUFFIX: &str = "@ticker";

pub(super) fn collect(value: &Value, quote_assets: &[String], out: &mut Vec<CanonicalEvent>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, quote_assets, out);
            }
        }
        Value::Object(obj) => {
            if let Some(stream) = obj.get("stream").and_then(Value::as_str) {
                if stream.contains(TICKER_STREAM_SUFFIX)
                    && let Some(data) = obj.get("data")
                {
                    collect(data, quote_assets, out);
                }
            } else if obj.get("e").and_then(Value::as_str) == Some(TICKER_EVENT)
                && let Some(ticker) = ticker(obj, quote_assets)
            {
                out.push(CanonicalEvent::Ticker(ticker));
            }
        }
        _ => {}
    }
}

fn ticker(obj: &Map<String, Value>, quote_assets: &[String]) -> Option<Ticker> {
    let Some(raw) = str_field(obj, "s") else {
        tracing::warn!("Dropping crypto ticker without symbol");
        return None;
    };
    let Some(symbol) = restore_symbol(raw, quote_assets) else {
        tracing::warn!(symbol = raw, "Dropping crypto ticker with unknown quote asset");
        return None;
    };

    Some(Ticker {
        symbol,
        price: decimal_field(obj, "c"),
        volume_24h: decimal_field(obj, "v"),
        change_24h_pct: decimal_field(obj, "P"),
        timestamp: timestamp_field(obj, "E"),
    })
}

/// Restore `BTCUSDT` to `BTC/USDT` by matching a known quote asset suffix.
///
/// `quote_assets` must be upper-case and ordered longest first.
#[must_use]
pub fn restore_symbol(raw: &str, quote_assets: &[String]) -> Option<Symbol> {
    let upper = raw.trim().to_ascii_uppercase();
    quote_assets.iter().find_map(|quote| {
        let base = upper.strip_suffix(quote.as_str())?;
        (!base.is_empty()).then(|| format!("{base}/{quote}"))
    })
}

/// Canonical `BASE/QUOTE` form of a client-requested crypto symbol.
///
/// Accepts `eth/usdt`, `ETH-USDT`, `eth_usdt` and `ETHUSDT`, which all map
/// to the symbol the ticker for `ETHUSDT` carries. An unknown quote asset
/// keeps the separated form as written, or the compact form if there is
/// none.
#[must_use]
pub fn canonical_symbol(requested: &str, quote_assets: &[String]) -> Symbol {
    let upper = requested.trim().to_ascii_uppercase();
    let compact: String = upper.chars().filter(|c| !is_separator(*c)).collect();
    restore_symbol(&compact, quote_assets).unwrap_or_else(|| upper.replace(is_separator, "/"))
}

const fn is_separator(c: char) -> bool {
    matches!(c, '/' | '-' | '_')
}

/// Upstream stream name for a canonical symbol: `BTC/USDT` -> `btcusdt@ticker`.
#[must_use]
pub fn stream_name(symbol: &str) -> String {
    let compact: String = symbol
        .chars()
        .filter(|c| !is_separator(*c))
        .collect();
    format!("{}{TICKER_STREAM_SUFFIX}", compact.to_ascii_lowercase())
}
