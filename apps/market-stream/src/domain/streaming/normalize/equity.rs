//! Alpaca stock trade and quote payloads.
//!
//! Frames are a JSON array of messages or a single message object. The
//! one-letter `T` field selects the shape: `t` trade, `q` quote. Control
//! messages (`success`, `subscription`, `error`) and bars are ignored.

use serde_json::{Map, Value};

use super::{decimal_field, str_field, timestamp_field};
use crate::domain::streaming::{CanonicalEvent, Quote, Trade};

pub(super) fn collect(value: &Value, out: &mut Vec<CanonicalEvent>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Object(obj) => {
            let event = match obj.get("T").and_then(Value::as_str) {
                Some("t") => trade(obj).map(CanonicalEvent::Trade),
                Some("q") => quote(obj).map(CanonicalEvent::Quote),
                _ => None,
            };
            out.extend(event);
        }
        _ => {}
    }
}

fn symbol(obj: &Map<String, Value>) -> Option<String> {
    let symbol = str_field(obj, "S").map(str::to_string);
    if symbol.is_none() {
        tracing::warn!(
            kind = obj.get("T").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "Dropping equities message without symbol"
        );
    }
    symbol
}

fn trade(obj: &Map<String, Value>) -> Option<Trade> {
    Some(Trade {
        symbol: symbol(obj)?,
        price: decimal_field(obj, "p"),
        size: decimal_field(obj, "s"),
        timestamp: timestamp_field(obj, "t"),
    })
}

fn quote(obj: &Map<String, Value>) -> Option<Quote> {
    Some(Quote {
        symbol: symbol(obj)?,
        bid: decimal_field(obj, "bp"),
        ask: decimal_field(obj, "ap"),
        bid_size: decimal_field(obj, "bs"),
        ask_size: decimal_field(obj, "as"),
        timestamp: timestamp_field(obj, "t"),
    })
}
