//! Market Stream Configuration Settings
//!
//! Configuration types for the market stream service, loaded from
//! environment variables.

use std::time::Duration;

use crate::application::services::ReconnectConfig;
use crate::domain::streaming::normalize::{DEFAULT_QUOTE_ASSETS, Normalizer};
use crate::infrastructure::broadcast::DEFAULT_CLIENT_QUEUE_CAPACITY;
use crate::infrastructure::venue::alpaca::{Credentials, DataFeed};
use crate::infrastructure::venue::binance::DEFAULT_CRYPTO_STREAM_URL;
use crate::infrastructure::venue::{ConnectorConfig, DEFAULT_WRITE_TIMEOUT, HeartbeatConfig};

/// Downstream server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// WebSocket and status HTTP port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Per-client outbound queue capacity.
    pub client_queue_capacity: usize,
    /// How long shutdown waits for connectors to stop.
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            health_port: 8082,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Upstream venue connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamSettings {
    /// Equities feed.
    pub feed: DataFeed,
    /// Equities stream URL.
    pub equity_url: String,
    /// Crypto stream URL.
    pub crypto_url: String,
    /// Crypto quote assets used to restore `BASE/QUOTE` symbols.
    pub quote_assets: Vec<String>,
    /// Bound on connect plus venue handshake.
    pub handshake_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Reconnect jitter factor (0.0 - 1.0).
    pub reconnect_jitter: f64,
    /// Ping interval.
    pub ping_interval: Duration,
    /// Read timeout before the connection is considered half-open.
    pub read_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        let feed = DataFeed::default();
        Self {
            feed,
            equity_url: feed.stream_url(),
            crypto_url: DEFAULT_CRYPTO_STREAM_URL.to_string(),
            quote_assets: DEFAULT_QUOTE_ASSETS.iter().map(ToString::to_string).collect(),
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(5000),
            reconnect_jitter: 0.0,
            ping_interval: Duration::from_secs(20),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl UpstreamSettings {
    /// Connector timing.
    #[must_use]
    pub const fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            handshake_timeout: self.handshake_timeout,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            heartbeat: HeartbeatConfig::new(self.ping_interval, self.read_timeout),
        }
    }

    /// Reconnect policy configuration.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::new(self.reconnect_delay, self.reconnect_jitter)
    }

    /// Normalizer for the configured quote assets.
    #[must_use]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(&self.quote_assets)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    /// Equities API credentials.
    pub credentials: Credentials,
    /// Downstream server settings.
    pub server: ServerSettings,
    /// Upstream venue settings.
    pub upstream: UpstreamSettings,
}

impl MarketStreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// URL is not a WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unparseable numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty, a URL
    /// is not a WebSocket URL, or an upstream timeout is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = required(&lookup, "ALPACA_KEY")?;
        let secret = required(&lookup, "ALPACA_SECRET")?;
        let credentials =
            Credentials::new(key, secret).map_err(|e| ConfigError::InvalidValue {
                key: "ALPACA_KEY".to_string(),
                reason: e.to_string(),
            })?;

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: parse_or(&lookup, "MARKET_STREAM_PORT", server_defaults.port),
            health_port: parse_or(
                &lookup,
                "MARKET_STREAM_HEALTH_PORT",
                server_defaults.health_port,
            ),
            client_queue_capacity: parse_or(
                &lookup,
                "MARKET_STREAM_CLIENT_QUEUE_CAPACITY",
                server_defaults.client_queue_capacity,
            )
            .max(1),
            shutdown_grace: parse_secs_or(
                &lookup,
                "MARKET_STREAM_SHUTDOWN_GRACE_SECS",
                server_defaults.shutdown_grace,
            ),
        };

        let upstream_defaults = UpstreamSettings::default();
        let feed = lookup("ALPACA_FEED")
            .map(|s| DataFeed::from_str_case_insensitive(&s))
            .unwrap_or_default();
        let quote_assets = lookup("CRYPTO_QUOTE_ASSETS")
            .map(|s| {
                s.split(',')
                    .map(|q| q.trim().to_ascii_uppercase())
                    .filter(|q| !q.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|assets| !assets.is_empty())
            .unwrap_or(upstream_defaults.quote_assets);

        let upstream = UpstreamSettings {
            feed,
            equity_url: ws_url(&lookup, "EQUITY_STREAM_URL", feed.stream_url())?,
            crypto_url: ws_url(&lookup, "CRYPTO_STREAM_URL", upstream_defaults.crypto_url)?,
            quote_assets,
            handshake_timeout: nonzero_secs_or(
                &lookup,
                "MARKET_STREAM_HANDSHAKE_TIMEOUT_SECS",
                upstream_defaults.handshake_timeout,
            )?,
            reconnect_delay: parse_millis_or(
                &lookup,
                "MARKET_STREAM_RECONNECT_DELAY_MS",
                upstream_defaults.reconnect_delay,
            ),
            reconnect_jitter: parse_or(
                &lookup,
                "MARKET_STREAM_RECONNECT_JITTER",
                upstream_defaults.reconnect_jitter,
            ),
            ping_interval: nonzero_secs_or(
                &lookup,
                "MARKET_STREAM_PING_INTERVAL_SECS",
                upstream_defaults.ping_interval,
            )?,
            read_timeout: nonzero_secs_or(
                &lookup,
                "MARKET_STREAM_READ_TIMEOUT_SECS",
                upstream_defaults.read_timeout,
            )?,
        };

        Ok(Self {
            credentials,
            server,
            upstream,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn ws_url<F>(lookup: &F, key: &str, default: String) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(url) = lookup(key).map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
        return Ok(default);
    };
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a ws:// or wss:// URL, got {url}"),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Like [`parse_secs_or`], but an explicit zero is a startup error.
fn nonzero_secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_secs_or(lookup, key, default);
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(value)
}

fn parse_millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn config(vars: &[(&str, &str)]) -> Result<MarketStreamConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        MarketStreamConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDS: [(&str, &str); 2] = [("ALPACA_KEY", "key123"), ("ALPACA_SECRET", "secret456")];

    #[test]
    fn defaults_with_credentials_only() {
        let config = config(&CREDS).unwrap();

        assert_eq!(config.server, ServerSettings::default());
        assert_eq!(config.upstream, UpstreamSettings::default());
        assert_eq!(
            config.upstream.equity_url,
            "wss://stream.data.alpaca.markets/v2/sip"
        );
        assert_eq!(config.upstream.crypto_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.server.client_queue_capacity, 1024);
        assert_eq!(config.upstream.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn missing_credentials_are_fatal() {
        assert!(matches!(
            config(&[("ALPACA_SECRET", "s")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "ALPACA_KEY"
        ));
        assert!(matches!(
            config(&[("ALPACA_KEY", "k"), ("ALPACA_SECRET", "  ")]),
            Err(ConfigError::EmptyValue(key)) if key == "ALPACA_SECRET"
        ));
    }

    #[test]
    fn iex_feed_changes_default_equity_url() {
        let config = config(&[CREDS[0], CREDS[1], ("ALPACA_FEED", "IEX")]).unwrap();
        assert_eq!(config.upstream.feed, DataFeed::Iex);
        assert_eq!(
            config.upstream.equity_url,
            "wss://stream.data.alpaca.markets/v2/iex"
        );
    }

    #[test]
    fn url_overrides_must_be_websocket() {
        let config_ok = config(&[
            CREDS[0],
            CREDS[1],
            ("CRYPTO_STREAM_URL", "ws://127.0.0.1:9000/ws"),
        ])
        .unwrap();
        assert_eq!(config_ok.upstream.crypto_url, "ws://127.0.0.1:9000/ws");

        assert!(matches!(
            config(&[CREDS[0], CREDS[1], ("EQUITY_STREAM_URL", "https://example.com")]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "EQUITY_STREAM_URL"
        ));
    }

    #[test]
    fn numeric_overrides_and_fallbacks() {
        let config = config(&[
            CREDS[0],
            CREDS[1],
            ("MARKET_STREAM_PORT", "9000"),
            ("MARKET_STREAM_RECONNECT_DELAY_MS", "250"),
            ("MARKET_STREAM_READ_TIMEOUT_SECS", "not-a-number"),
            ("MARKET_STREAM_CLIENT_QUEUE_CAPACITY", "0"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.upstream.read_timeout, Duration::from_secs(60));
        assert_eq!(config.server.client_queue_capacity, 1);
    }

    #[test_case("MARKET_STREAM_HANDSHAKE_TIMEOUT_SECS" ; "handshake timeout")]
    #[test_case("MARKET_STREAM_PING_INTERVAL_SECS" ; "ping interval")]
    #[test_case("MARKET_STREAM_READ_TIMEOUT_SECS" ; "read timeout")]
    fn zero_upstream_durations_are_rejected(key: &str) {
        let result = config(&[CREDS[0], CREDS[1], (key, "0")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: k, .. }) if k == key
        ));
    }

    #[test]
    fn reconnect_delay_is_floored() {
        let config = config(&[
            CREDS[0],
            CREDS[1],
            ("MARKET_STREAM_RECONNECT_DELAY_MS", "1"),
        ])
        .unwrap();
        assert_eq!(
            config.upstream.reconnect_config().delay,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn quote_assets_override() {
        let config = config(&[CREDS[0], CREDS[1], ("CRYPTO_QUOTE_ASSETS", "usdt, eur,,")]).unwrap();
        assert_eq!(config.upstream.quote_assets, vec!["USDT", "EUR"]);
        assert_eq!(config.upstream.normalizer().quote_assets(), ["USDT", "EUR"]);
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = config(&CREDS).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret456"));
    }
}
