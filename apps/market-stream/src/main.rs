//! Market Stream Binary
//!
//! Starts the market data fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Alpaca API key
//! - `ALPACA_SECRET`: Alpaca API secret
//!
//! ## Optional
//! - `ALPACA_FEED`: Equities feed - "sip" | "iex" (default: sip)
//! - `EQUITY_STREAM_URL`, `CRYPTO_STREAM_URL`: Upstream URL overrides
//! - `CRYPTO_QUOTE_ASSETS`: Comma-separated crypto quote assets
//! - `MARKET_STREAM_PORT`: WebSocket/status HTTP port (default: 8000)
//! - `MARKET_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `MARKET_STREAM_RECONNECT_DELAY_MS`: Reconnect delay (default: 5000)
//! - `MARKET_STREAM_SHUTDOWN_GRACE_SECS`: Shutdown grace period (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log filter (default: market_stream=info)

use std::sync::Arc;

use anyhow::Context;
use market_stream::application::ports::{EventSink, UpstreamConnector};
use market_stream::infrastructure::telemetry;
use market_stream::infrastructure::venue::alpaca::AlpacaAdapter;
use market_stream::infrastructure::venue::binance::BinanceAdapter;
use market_stream::{
    Broadcaster, ClientRegistry, CryptoConnector, EquityConnector, HealthServer,
    HealthServerState, MarketServer, MarketStreamConfig, MarketSupervisor, ServerState,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Already-installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = MarketStreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let upstream = &config.upstream;

    // Venue connectors
    let equity: Arc<dyn UpstreamConnector> = Arc::new(EquityConnector::new(
        AlpacaAdapter::new(upstream.equity_url.clone(), config.credentials.clone()),
        upstream.connector_config(),
    ));
    let crypto: Arc<dyn UpstreamConnector> = Arc::new(CryptoConnector::new(
        BinanceAdapter::new(upstream.crypto_url.clone(), upstream.normalizer()),
        upstream.connector_config(),
    ));

    // Registry, fan-out and supervision
    let registry = Arc::new(ClientRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
    let supervisor = Arc::new(
        MarketSupervisor::new(
            registry,
            vec![equity, crypto],
            upstream.reconnect_config(),
            shutdown_token.child_token(),
        )
        .with_normalizer(upstream.normalizer()),
    );
    let sink: Arc<dyn EventSink> = Arc::clone(&broadcaster) as Arc<dyn EventSink>;
    supervisor.start(&sink);

    // Downstream server
    let server_state = Arc::new(ServerState::new(
        Arc::clone(&supervisor),
        broadcaster,
        config.server.client_queue_capacity,
    ));
    let market_server = MarketServer::new(
        config.server.port,
        Arc::clone(&server_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = market_server.run().await {
            tracing::error!(error = %e, "Market stream server error");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        server_state,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Market stream ready");

    await_shutdown().await;
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = config.server.shutdown_grace.as_secs(),
        "Graceful shutdown started"
    );
    supervisor.shutdown(config.server.shutdown_grace).await;

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &MarketStreamConfig) {
    tracing::info!(
        feed = config.upstream.feed.as_str(),
        port = config.server.port,
        health_port = config.server.health_port,
        client_queue_capacity = config.server.client_queue_capacity,
        reconnect_delay_ms = u64::try_from(config.upstream.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        equity_url = %config.upstream.equity_url,
        crypto_url = %config.upstream.crypto_url,
        quote_assets = ?config.upstream.quote_assets,
        "Upstream endpoints"
    );
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
