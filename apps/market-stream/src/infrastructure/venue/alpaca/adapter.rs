//! Alpaca Stock Stream Adapter
//!
//! Connects to Alpaca's stock data stream for real-time trades and quotes.
//!
//! # Stream URL
//!
//! - `wss://stream.data.alpaca.markets/v2/{feed}` where feed is `sip` or `iex`
//!
//! Market data streams always use production URLs regardless of trading
//! environment.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use super::auth::{AuthHandler, AuthStep, Credentials};
use super::messages::{ControlMessage, SubscriptionRequest, parse_control, stream_errors};
use crate::application::ports::ConnectionError;
use crate::domain::streaming::normalize::{DecodeError, Normalizer};
use crate::domain::streaming::{CanonicalEvent, Symbol, Venue};
use crate::infrastructure::venue::connector::{VenueAdapter, WsStream};

/// Market data feed for the stock stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full market data.
    #[default]
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    Iex,
}

impl DataFeed {
    /// Parse feed type from string. Anything but `iex` is SIP.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "iex" => Self::Iex,
            _ => Self::Sip,
        }
    }

    /// Get the feed name for WebSocket URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }

    /// Default stream URL for this feed.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("wss://stream.data.alpaca.markets/v2/{}", self.as_str())
    }
}

/// Alpaca venue adapter.
#[derive(Debug)]
pub struct AlpacaAdapter {
    url: String,
    credentials: Credentials,
    normalizer: Normalizer,
}

impl AlpacaAdapter {
    /// Create an adapter for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            normalizer: Normalizer::default(),
        }
    }
}

#[async_trait]
impl VenueAdapter for AlpacaAdapter {
    fn venue(&self) -> Venue {
        Venue::Equity
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn handshake(&self, stream: &mut WsStream) -> Result<(), ConnectionError> {
        let mut auth = AuthHandler::new(self.credentials.clone());

        while !auth.is_authenticated() {
            let frame = stream.next().await.ok_or(ConnectionError::Closed)??;
            let text = match frame {
                Message::Text(text) => text,
                Message::Ping(data) => {
                    stream.send(Message::Pong(data)).await?;
                    continue;
                }
                Message::Close(_) => return Err(ConnectionError::Closed),
                _ => continue,
            };

            let messages = match parse_control(text.as_str()) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring unparseable handshake frame");
                    continue;
                }
            };

            for message in messages {
                match message {
                    ControlMessage::Success(success) => match auth.on_success(&success) {
                        AuthStep::Send(request) => {
                            let json = serde_json::to_string(&request)
                                .map_err(|e| ConnectionError::Encode(e.to_string()))?;
                            stream.send(Message::Text(json.into())).await?;
                            tracing::debug!(key = %self.credentials.key(), "Sent auth request");
                        }
                        AuthStep::Done => {
                            tracing::info!("Equities stream authenticated");
                        }
                        AuthStep::Wait => {}
                    },
                    ControlMessage::Error(error) => {
                        let cause = auth.on_error(&error);
                        tracing::error!(code = error.code, msg = %error.msg, "Equities handshake rejected");
                        return Err(ConnectionError::Authentication(cause.to_string()));
                    }
                    ControlMessage::Other => {}
                }
            }
        }

        Ok(())
    }

    fn subscribe_request(&self, symbols: &[Symbol]) -> Result<String, ConnectionError> {
        serde_json::to_string(&SubscriptionRequest::trades_and_quotes(symbols))
            .map_err(|e| ConnectionError::Encode(e.to_string()))
    }

    fn decode(&self, frame: &str) -> Result<Vec<CanonicalEvent>, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(frame)?;
        for error in stream_errors(&value) {
            tracing::warn!(code = error.code, msg = %error.msg, "Equities stream error");
        }
        Ok(self.normalizer.normalize_value(Venue::Equity, &value))
    }
}
