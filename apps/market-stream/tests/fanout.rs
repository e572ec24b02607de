//! Fan-out Integration Tests
//!
//! Mock venue -> connector -> broadcaster -> downstream WebSocket clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use common::{Greeting, Harness, MockVenue, binance_ticker, crypto_connector, equity_connector};
use market_stream::Venue;
use market_stream::infrastructure::broadcast::ClientHandle;
use market_stream::infrastructure::metrics::EvictionReason;

#[tokio::test]
async fn test_explicit_and_wildcard_subscribers() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;
    harness.wait_running(Venue::Crypto).await;

    let mut a = harness.client().await;
    assert_eq!(
        a.subscribe(&["btc/usdt"], "crypto").await,
        json!({"type": "subscribed", "symbols": ["BTC/USDT"]})
    );
    let (_, frame) = venue.next_frame().await;
    assert_eq!(frame["method"], "SUBSCRIBE");
    assert_eq!(frame["params"], json!(["btcusdt@ticker"]));

    let mut b = harness.client().await;
    assert_eq!(
        b.subscribe(&["*"], "crypto").await,
        json!({"type": "subscribed", "symbols": ["*"]})
    );
    assert!(venue.stays_quiet(Duration::from_millis(200)).await);

    venue.push(&binance_ticker("BTCUSDT", "42000.50"));

    let expected = json!({
        "type": "market_data",
        "symbol": "BTC/USDT",
        "data": {
            "type": "ticker",
            "symbol": "BTC/USDT",
            "price": 42000.5,
            "volume_24h": 1000.2,
            "change_24h": 3.1,
            "timestamp": 1_700_000_000_000_i64
        }
    });
    assert_eq!(a.next_json().await, expected);
    assert_eq!(b.next_json().await, expected);

    venue.push(&binance_ticker("ETHUSDT", "2500"));
    venue.push(&binance_ticker("BTCUSDT", "42001"));

    let b_eth = b.next_json().await;
    assert_eq!(b_eth["symbol"], "ETH/USDT");
    assert_eq!(b.next_json().await["symbol"], "BTC/USDT");

    // A skips ETH entirely.
    let a_next = a.next_json().await;
    assert_eq!(a_next["symbol"], "BTC/USDT");
    assert_eq!(a_next["data"]["price"], 42001.0);
}

#[tokio::test]
async fn test_crypto_symbol_forms_all_receive_canonical_ticks() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;
    harness.wait_running(Venue::Crypto).await;

    let mut clients = Vec::new();
    for form in ["ETH-USDT", "ethusdt", "ETH/USDT"] {
        let mut client = harness.client().await;
        assert_eq!(
            client.subscribe(&[form], "crypto").await,
            json!({"type": "subscribed", "symbols": ["ETH/USDT"]})
        );
        clients.push(client);
    }

    let (_, frame) = venue.next_frame().await;
    assert_eq!(frame["params"], json!(["ethusdt@ticker"]));
    assert!(venue.stays_quiet(Duration::from_millis(200)).await);

    venue.push(&binance_ticker("ETHUSDT", "2500"));
    for client in &mut clients {
        let message = client.next_json().await;
        assert_eq!(message["symbol"], "ETH/USDT");
        assert_eq!(message["data"]["price"], 2500.0);
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;
    harness.wait_running(Venue::Crypto).await;

    let mut client = harness.client().await;
    client.subscribe(&["BTC/USDT"], "crypto").await;
    client
        .send(json!({"action": "unsubscribe", "symbols": ["BTC/USDT"]}))
        .await;
    assert_eq!(
        client.next_json().await,
        json!({"type": "unsubscribed", "symbols": ["BTC/USDT"]})
    );

    venue.push(&binance_ticker("BTCUSDT", "42000"));
    assert!(client.stays_quiet(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn test_bad_requests_keep_connection_open() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;

    let mut client = harness.client().await;
    client.send(json!({"action": "ping"})).await;
    assert_eq!(client.next_json().await["type"], "error");

    client
        .send(json!({"action": "subscribe", "symbols": ["AAPL"], "asset_type": "equity"}))
        .await;
    let reply = client.next_json().await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("equity"));

    assert_eq!(
        client.subscribe(&["ETH/USDT"], "crypto").await,
        json!({"type": "subscribed", "symbols": ["ETH/USDT"]})
    );
}

#[tokio::test]
async fn test_slow_consumer_does_not_stall_others() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;
    harness.wait_running(Venue::Crypto).await;

    let mut fast = harness.client().await;
    fast.subscribe(&["BTC/USDT"], "crypto").await;

    // A subscriber whose writer never drains its one-slot queue.
    let supervisor = harness.state.supervisor();
    let (stalled, mut stalled_outbox) = ClientHandle::channel(1);
    let stalled_id = supervisor.open_connection(stalled).unwrap();
    supervisor
        .subscribe(stalled_id, Venue::Crypto, &["BTC/USDT".to_string()])
        .await
        .unwrap();

    for price in ["1", "2", "3"] {
        venue.push(&binance_ticker("BTCUSDT", price));
    }
    for price in [1.0, 2.0, 3.0] {
        assert_eq!(fast.next_json().await["data"]["price"], price);
    }

    assert!(!supervisor.registry().contains(stalled_id));
    assert_eq!(
        stalled_outbox.next().await,
        market_stream::infrastructure::broadcast::Outbound::Evicted(vec!["BTC/USDT".to_string()])
    );
    assert_eq!(harness.state.broadcaster().stats().evicted, 1);
}

#[tokio::test]
async fn test_evicted_client_gets_notice_and_policy_close() {
    let venue = MockVenue::start(Greeting::None).await;
    let harness = Harness::start(vec![crypto_connector(&venue)], 64).await;

    let mut client = harness.client().await;
    client.subscribe(&["BTC/USDT", "ETH/USDT"], "crypto").await;

    let registry = harness.state.supervisor().registry();
    let id = *registry.subscribers_for("BTC/USDT").iter().next().unwrap();
    assert!(harness.state.broadcaster().evict(id, EvictionReason::QueueFull));

    assert_eq!(
        client.next_json().await,
        json!({"type": "unsubscribed", "symbols": ["BTC/USDT", "ETH/USDT"]})
    );
    match client.next_message().await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason.as_str(), "slow consumer");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_equity_handshake_subscribe_and_trade() {
    let venue = MockVenue::start(Greeting::Alpaca).await;
    let harness = Harness::start(vec![equity_connector(&venue)], 64).await;
    harness.wait_running(Venue::Equity).await;

    let (_, auth) = venue.next_frame().await;
    assert_eq!(auth, json!({"action": "auth", "key": "key", "secret": "secret"}));

    let mut client = harness.client().await;
    client
        .send(json!({"action": "subscribe", "symbols": ["aapl"]}))
        .await;
    assert_eq!(
        client.next_json().await,
        json!({"type": "subscribed", "symbols": ["AAPL"]})
    );

    let (_, subscribe) = venue.next_frame().await;
    assert_eq!(
        subscribe,
        json!({"action": "subscribe", "trades": ["AAPL"], "quotes": ["AAPL"]})
    );

    venue.push(
        r#"[{"T":"t","S":"AAPL","p":189.1,"s":100,"t":"2024-01-02T14:30:00Z"},{"T":"q","S":"MSFT","bp":400.1,"ap":400.2}]"#,
    );

    assert_eq!(
        client.next_json().await,
        json!({
            "type": "market_data",
            "symbol": "AAPL",
            "data": {
                "type": "trade",
                "symbol": "AAPL",
                "price": 189.1,
                "size": 100.0,
                "timestamp": "2024-01-02T14:30:00Z"
            }
        })
    );
    assert!(client.stays_quiet(Duration::from_millis(200)).await);
}
