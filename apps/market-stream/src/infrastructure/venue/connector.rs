//! Generic Venue Connector
//!
//! One persistent WebSocket connection to a venue. The venue-specific parts
//! (URL, handshake, subscribe frame, frame decoding) come from a
//! [`VenueAdapter`]; everything else lives here:
//!
//! - bounded connect + handshake;
//! - subscribe writes that share the sink with pong replies and pings;
//! - the receive loop, which never fails: decode errors are logged and
//!   counted, and the loop only returns on close, transport error, or read
//!   timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use crate::application::ports::{ConnectionError, Disconnect, EventSink, UpstreamConnector};
use crate::domain::connector::{ConnectorLifecycle, ConnectorState};
use crate::domain::streaming::normalize::DecodeError;
use crate::domain::streaming::{CanonicalEvent, Symbol, Venue};
use crate::infrastructure::metrics;

/// Client-side WebSocket stream to a venue.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Upper bound on sending a close frame during disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on one upstream write, sink lock included.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Venue-specific protocol pieces.
#[async_trait]
pub trait VenueAdapter: Send + Sync + 'static {
    /// Venue served.
    fn venue(&self) -> Venue;

    /// WebSocket endpoint.
    fn url(&self) -> &str;

    /// Post-upgrade handshake (authentication). Runs inside the connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the venue rejects the session.
    async fn handshake(&self, _stream: &mut WsStream) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Encode a subscription request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Encode`] if the request cannot be built.
    fn subscribe_request(&self, symbols: &[Symbol]) -> Result<String, ConnectionError>;

    /// Decode one text frame into canonical events.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the frame is malformed.
    fn decode(&self, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError>;
}

/// Connector timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Bound on TCP/TLS/WebSocket setup plus the venue handshake.
    pub handshake_timeout: Duration,
    /// Bound on one write (subscribe, ping, pong). Expiry is a transport
    /// failure.
    pub write_timeout: Duration,
    /// Ping interval and read timeout.
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// WebSocket connector for one venue.
pub struct VenueConnector<A> {
    adapter: A,
    config: ConnectorConfig,
    state: Arc<ConnectorState>,
    sink: Mutex<Option<WsSink>>,
    source: Mutex<Option<WsSource>>,
}

impl<A: VenueAdapter> VenueConnector<A> {
    /// Create a disconnected connector.
    #[must_use]
    pub fn new(adapter: A, config: ConnectorConfig) -> Self {
        let state = Arc::new(ConnectorState::new(adapter.venue()));
        Self {
            adapter,
            config,
            state,
            sink: Mutex::new(None),
            source: Mutex::new(None),
        }
    }

    /// Venue protocol adapter.
    #[must_use]
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    fn transition(&self, lifecycle: ConnectorLifecycle) {
        self.state.set_lifecycle(lifecycle);
        metrics::set_connector_state(self.adapter.venue(), lifecycle);
    }

    async fn establish(&self) -> Result<WsStream, ConnectionError> {
        let (mut stream, _response) = tokio_tungstenite::connect_async(self.adapter.url()).await?;
        self.adapter.handshake(&mut stream).await?;
        Ok(stream)
    }

    async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let limit = self.config.write_timeout;
        let write = async {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
            sink.send(message).await?;
            Ok::<(), ConnectionError>(())
        };
        tokio::time::timeout(limit, write).await.unwrap_or_else(|_| {
            Err(ConnectionError::Transport(format!(
                "write timed out after {limit:?}"
            )))
        })
    }

    fn handle_text(&self, frame: &str, sink: &dyn EventSink) {
        let venue = self.adapter.venue();
        self.state.record_message();
        metrics::record_message_received(venue);

        match self.adapter.decode(frame) {
            Ok(events) => {
                for event in events {
                    metrics::record_event_published(venue, event.kind());
                    sink.publish(event);
                }
            }
            Err(e) => {
                metrics::record_decode_error(venue);
                tracing::warn!(venue = %venue, error = %e, "Dropping undecodable frame");
            }
        }
    }

    fn handle_binary(&self, frame: &[u8], sink: &dyn EventSink) {
        match std::str::from_utf8(frame) {
            Ok(text) => self.handle_text(text, sink),
            Err(_) => {
                let venue = self.adapter.venue();
                self.state.record_message();
                metrics::record_message_received(venue);
                metrics::record_decode_error(venue);
                tracing::warn!(venue = %venue, error = %DecodeError::NotUtf8, "Dropping undecodable frame");
            }
        }
    }
}

#[async_trait]
impl<A: VenueAdapter> UpstreamConnector for VenueConnector<A> {
    fn venue(&self) -> Venue {
        self.adapter.venue()
    }

    fn state(&self) -> Arc<ConnectorState> {
        Arc::clone(&self.state)
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let venue = self.adapter.venue();
        if self.state.reconnect_attempts() > 0 {
            metrics::record_reconnect(venue);
        }
        self.transition(ConnectorLifecycle::Connecting);
        tracing::info!(venue = %venue, url = %self.adapter.url(), "Connecting to venue");

        let timeout = self.config.handshake_timeout;
        let outcome = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
        };

        match outcome {
            Ok(stream) => {
                let (write, read) = stream.split();
                *self.sink.lock().await = Some(write);
                *self.source.lock().await = Some(read);
                self.transition(ConnectorLifecycle::Connected);
                tracing::info!(venue = %venue, "Venue connected");
                Ok(())
            }
            Err(e) => {
                let error_type = match &e {
                    ConnectionError::HandshakeTimeout(_) => "handshake_timeout",
                    ConnectionError::Authentication(_) => "authentication",
                    _ => "transport",
                };
                metrics::record_connection_error(venue, error_type);
                self.transition(ConnectorLifecycle::Disconnected);
                Err(e)
            }
        }
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), ConnectionError> {
        if symbols.is_empty() {
            return Ok(());
        }
        let request = self.adapter.subscribe_request(symbols)?;
        self.send(Message::Text(request.into())).await?;
        metrics::set_upstream_symbols(self.adapter.venue(), self.state.subscribed_symbols().len());
        tracing::debug!(venue = %self.adapter.venue(), count = symbols.len(), "Subscribe request sent");
        Ok(())
    }

    async fn run(&self, sink: Arc<dyn EventSink>) -> Disconnect {
        let Some(mut source) = self.source.lock().await.take() else {
            return Disconnect::NotConnected;
        };
        self.transition(ConnectorLifecycle::Running);

        let heartbeat = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(4);
        let heartbeat_cancel = CancellationToken::new();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat,
                Arc::clone(&heartbeat),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        if let Err(e) = self.send(Message::Ping(Vec::new().into())).await {
                            return Disconnect::Transport(e.to_string());
                        }
                    }
                    Some(HeartbeatEvent::Timeout) | None => {
                        return Disconnect::ReadTimeout(self.config.heartbeat.read_timeout);
                    }
                },
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_frame();
                            self.handle_text(text.as_str(), sink.as_ref());
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat.record_frame();
                            self.handle_binary(&data, sink.as_ref());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_frame();
                            if let Err(e) = self.send(Message::Pong(data)).await {
                                return Disconnect::Transport(e.to_string());
                            }
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {
                            heartbeat.record_frame();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Disconnect::Closed(
                                frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                            );
                        }
                        Some(Err(e)) => return Disconnect::Transport(e.to_string()),
                        None => return Disconnect::Closed(None),
                    }
                }
            }
        }
    }

    async fn disconnect(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink
            && tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err()
        {
            tracing::debug!(venue = %self.adapter.venue(), "Close frame not acknowledged");
        }
        self.source.lock().await.take();

        if self.state.lifecycle() != ConnectorLifecycle::Disconnected {
            tracing::info!(venue = %self.adapter.venue(), "Venue disconnected");
        }
        self.transition(ConnectorLifecycle::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAdapter;

    impl VenueAdapter for EchoAdapter {
        fn venue(&self) -> Venue {
            Venue::Crypto
        }

        fn url(&self) -> &str {
            "ws://127.0.0.1:9"
        }

        fn subscribe_request(&self, symbols: &[Symbol]) -> Result<String, ConnectionError> {
            Ok(symbols.join(","))
        }

        fn decode(&self, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
            crate::domain::streaming::normalize::normalize(Venue::Crypto, frame)
        }
    }

    #[test]
    fn tungstenite_errors_map_to_connection_errors() {
        assert_eq!(
            ConnectionError::from(tungstenite::Error::ConnectionClosed),
            ConnectionError::Closed
        );
        assert!(matches!(
            ConnectionError::from(tungstenite::Error::Io(std::io::Error::other("reset"))),
            ConnectionError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn subscribe_without_transport_is_not_connected() {
        let connector = VenueConnector::new(EchoAdapter, ConnectorConfig::default());
        assert_eq!(
            connector.subscribe(&["BTC/USDT".to_string()]).await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(connector.subscribe(&[]).await, Ok(()));
    }

    #[tokio::test]
    async fn run_without_transport_returns_immediately() {
        struct Discard;
        impl EventSink for Discard {
            fn publish(&self, _event: CanonicalEvent) {}
        }

        let connector = VenueConnector::new(EchoAdapter, ConnectorConfig::default());
        assert_eq!(connector.run(Arc::new(Discard)).await, Disconnect::NotConnected);
        assert_eq!(connector.state().lifecycle(), ConnectorLifecycle::Disconnected);
    }

    #[tokio::test]
    async fn refused_connect_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        struct Refused(String);
        impl VenueAdapter for Refused {
            fn venue(&self) -> Venue {
                Venue::Equity
            }
            fn url(&self) -> &str {
                &self.0
            }
            fn subscribe_request(&self, _symbols: &[Symbol]) -> Result<String, ConnectionError> {
                Ok(String::new())
            }
            fn decode(&self, _frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
                Ok(Vec::new())
            }
        }

        let connector = VenueConnector::new(Refused(format!("ws://{addr}")), ConnectorConfig::default());
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(_)), "{err:?}");
        assert_eq!(connector.state().lifecycle(), ConnectorLifecycle::Disconnected);
    }

    #[tokio::test]
    async fn stalled_venue_write_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Complete the upgrade, then never read again.
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            std::future::pending::<()>().await;
        });

        struct Local(String);
        impl VenueAdapter for Local {
            fn venue(&self) -> Venue {
                Venue::Crypto
            }
            fn url(&self) -> &str {
                &self.0
            }
            fn subscribe_request(&self, symbols: &[Symbol]) -> Result<String, ConnectionError> {
                Ok(symbols.join(","))
            }
            fn decode(&self, _frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
                Ok(Vec::new())
            }
        }

        let config = ConnectorConfig {
            write_timeout: Duration::from_millis(200),
            ..ConnectorConfig::default()
        };
        let connector = VenueConnector::new(Local(format!("ws://{addr}")), config);
        connector.connect().await.unwrap();

        let bulk = vec!["X".repeat(1 << 20)];
        let mut outcome = Ok(());
        for _ in 0..256 {
            outcome = connector.subscribe(&bulk).await;
            if outcome.is_err() {
                break;
            }
        }
        assert_eq!(
            outcome,
            Err(ConnectionError::Transport(
                "write timed out after 200ms".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn silent_server_hits_handshake_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept TCP but never answer the upgrade.
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        struct Silent(String);
        impl VenueAdapter for Silent {
            fn venue(&self) -> Venue {
                Venue::Crypto
            }
            fn url(&self) -> &str {
                &self.0
            }
            fn subscribe_request(&self, _symbols: &[Symbol]) -> Result<String, ConnectionError> {
                Ok(String::new())
            }
            fn decode(&self, _frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
                Ok(Vec::new())
            }
        }

        let config = ConnectorConfig {
            handshake_timeout: Duration::from_millis(100),
            ..ConnectorConfig::default()
        };
        let connector = VenueConnector::new(Silent(format!("ws://{addr}")), config);
        assert_eq!(
            connector.connect().await,
            Err(ConnectionError::HandshakeTimeout(Duration::from_millis(100)))
        );
    }
}
