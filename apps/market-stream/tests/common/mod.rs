//! Shared harness: a scripted mock venue plus the downstream server wired
//! to real connectors over loopback sockets.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;

use market_stream::application::ports::{EventSink, UpstreamConnector};
use market_stream::infrastructure::server::router;
use market_stream::infrastructure::venue::alpaca::Credentials;
use market_stream::{
    AlpacaAdapter, BinanceAdapter, Broadcaster, ClientRegistry, ConnectorConfig,
    ConnectorLifecycle, CryptoConnector, EquityConnector, MarketSupervisor, Normalizer,
    ReconnectConfig, ServerState, Venue,
};

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Venue
// =============================================================================

enum Command {
    Send(String),
    Close,
}

/// How the mock venue behaves on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    /// Binance: no handshake.
    None,
    /// Alpaca: `connected` on accept, `authenticated` after any auth frame.
    Alpaca,
    /// Alpaca: `connected`, then reject auth with 402.
    AlpacaRejectAuth,
}

/// Scripted upstream venue.
pub struct MockVenue {
    addr: SocketAddr,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<(usize, String)>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    connections: Arc<AtomicUsize>,
}

impl MockVenue {
    /// Bind on loopback and start accepting.
    pub async fn start(greeting: Greeting) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_current = Arc::clone(&current);
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let n = accept_connections.fetch_add(1, Ordering::SeqCst) + 1;
                let (tx, rx) = mpsc::unbounded_channel();
                *accept_current.lock() = Some(tx);
                tokio::spawn(serve_connection(ws, n, greeting, rx, received_tx.clone()));
            }
        });

        Self {
            addr,
            received: tokio::sync::Mutex::new(received_rx),
            current,
            connections,
        }
    }

    /// `ws://` URL of the venue.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a text frame on the live connection.
    pub fn push(&self, frame: &str) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Command::Send(frame.to_string()));
        }
    }

    /// Close the live connection from the venue side.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.send(Command::Close);
        }
    }

    /// Next text frame a client sent, with its connection number.
    pub async fn next_frame(&self) -> (usize, Value) {
        let (n, text) = timeout(WAIT, self.received.lock().await.recv())
            .await
            .expect("venue frame timed out")
            .expect("venue closed");
        (n, serde_json::from_str(&text).unwrap())
    }

    /// True if no client frame arrives within `wait`.
    pub async fn stays_quiet(&self, wait: Duration) -> bool {
        timeout(wait, self.received.lock().await.recv()).await.is_err()
    }
}

async fn serve_connection(
    ws: WebSocketStream<TcpStream>,
    n: usize,
    greeting: Greeting,
    mut commands: mpsc::UnboundedReceiver<Command>,
    received: mpsc::UnboundedSender<(usize, String)>,
) {
    let (mut sink, mut source) = ws.split();
    if greeting != Greeting::None {
        let _ = sink
            .send(Message::Text(
                r#"[{"T":"success","msg":"connected"}]"#.into(),
            ))
            .await;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let text = text.to_string();
                    if text.contains(r#""action":"auth""#) {
                        let reply = match greeting {
                            Greeting::AlpacaRejectAuth => r#"[{"T":"error","code":402,"msg":"auth failed"}]"#,
                            _ => r#"[{"T":"success","msg":"authenticated"}]"#,
                        };
                        let _ = sink.send(Message::Text(reply.into())).await;
                    }
                    let _ = received.send((n, text));
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// =============================================================================
// Service Harness
// =============================================================================

/// Service under test.
pub struct Harness {
    /// Downstream server address.
    pub addr: SocketAddr,
    /// Shared server state.
    pub state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connector timing for tests.
pub fn test_connector_config() -> ConnectorConfig {
    ConnectorConfig {
        handshake_timeout: Duration::from_secs(2),
        ..ConnectorConfig::default()
    }
}

/// Crypto connector pointed at `venue`.
pub fn crypto_connector(venue: &MockVenue) -> Arc<dyn UpstreamConnector> {
    Arc::new(CryptoConnector::new(
        BinanceAdapter::new(venue.url(), Normalizer::default()),
        test_connector_config(),
    ))
}

/// Equities connector pointed at `venue`.
pub fn equity_connector(venue: &MockVenue) -> Arc<dyn UpstreamConnector> {
    Arc::new(EquityConnector::new(
        AlpacaAdapter::new(venue.url(), Credentials::new("key", "secret").unwrap()),
        test_connector_config(),
    ))
}

impl Harness {
    /// Start supervision and the downstream server.
    pub async fn start(connectors: Vec<Arc<dyn UpstreamConnector>>, queue_capacity: usize) -> Self {
        let cancel = CancellationToken::new();
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let supervisor = Arc::new(MarketSupervisor::new(
            registry,
            connectors,
            ReconnectConfig::new(Duration::from_millis(100), 0.0),
            cancel.child_token(),
        ));
        let sink: Arc<dyn EventSink> = Arc::clone(&broadcaster) as Arc<dyn EventSink>;
        supervisor.start(&sink);

        let state = Arc::new(ServerState::new(supervisor, broadcaster, queue_capacity));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&state));
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Wait until the connector for `venue` is running.
    pub async fn wait_running(&self, venue: Venue) {
        eventually(|| {
            self.state
                .supervisor()
                .snapshot(venue)
                .is_some_and(|s| s.status == ConnectorLifecycle::Running)
        })
        .await;
    }

    /// Open a downstream client.
    pub async fn client(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/api/market/ws", self.addr))
            .await
            .unwrap();
        Client { ws }
    }
}

/// Poll `check` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Downstream Client
// =============================================================================

/// Downstream WebSocket client.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    /// Send a JSON request.
    pub async fn send(&mut self, request: Value) {
        self.ws
            .send(Message::Text(request.to_string().into()))
            .await
            .unwrap();
    }

    /// Subscribe and return the ack.
    pub async fn subscribe(&mut self, symbols: &[&str], asset_type: &str) -> Value {
        self.send(serde_json::json!({
            "action": "subscribe",
            "symbols": symbols,
            "asset_type": asset_type,
        }))
        .await;
        self.next_json().await
    }

    /// Next frame of any kind.
    pub async fn next_message(&mut self) -> Message {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("client frame timed out")
                .expect("client stream ended")
                .unwrap();
            if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
                return message;
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn next_json(&mut self) -> Value {
        match self.next_message().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// True if no text frame arrives within `wait`.
    pub async fn stays_quiet(&mut self, wait: Duration) -> bool {
        timeout(wait, self.ws.next()).await.is_err()
    }
}

// =============================================================================
// Venue Frames
// =============================================================================

/// Binance 24h ticker frame.
pub fn binance_ticker(raw_symbol: &str, price: &str) -> String {
    serde_json::json!({
        "e": "24hrTicker",
        "E": 1_700_000_000_000_i64,
        "s": raw_symbol,
        "c": price,
        "v": "1000.2",
        "P": "3.1",
    })
    .to_string()
}
