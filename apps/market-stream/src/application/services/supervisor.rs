//! Connection Lifecycle Supervisor
//!
//! Owns the venue connectors and the subscription registry:
//!
//! - registers and tears down downstream connections;
//! - routes subscribe requests to the registry and, for symbols never seen
//!   before on that venue, to the connector's upstream subscription;
//! - runs one supervised task per connector that connects, re-sends the
//!   full accumulated symbol set, runs the receive loop, and waits the
//!   reconnect delay after every disconnect, until shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ConnectionError, Disconnect, EventSink, UpstreamConnector};
use crate::domain::connector::{ConnectorSnapshot, ConnectorState};
use crate::domain::streaming::normalize::Normalizer;
use crate::domain::streaming::{Symbol, Venue};
use crate::domain::subscription::{
    ConnectionId, RegistryError, RemovedConnection, SubscriptionRegistry,
};

/// Errors returned to downstream request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// Registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No connector is configured for the requested venue.
    #[error("no connector configured for {0} venue")]
    UnknownVenue(Venue),
}

/// Connection lifecycle supervisor.
pub struct Supervisor<H> {
    registry: Arc<SubscriptionRegistry<H>>,
    connectors: HashMap<Venue, Arc<dyn UpstreamConnector>>,
    normalizer: Normalizer,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl<H> Supervisor<H>
where
    H: Send + Sync + 'static,
{
    /// Create a supervisor over the given connectors.
    ///
    /// A later connector for the same venue replaces an earlier one.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry<H>>,
        connectors: Vec<Arc<dyn UpstreamConnector>>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let connectors = connectors
            .into_iter()
            .map(|connector| (connector.venue(), connector))
            .collect();
        Self {
            registry,
            connectors,
            normalizer: Normalizer::default(),
            reconnect,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// Canonicalize requested symbols with `normalizer`'s quote assets.
    ///
    /// Must match the normalizer the connectors publish with, or crypto
    /// subscribers will be keyed on symbols no event carries.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Subscription registry shared with the broadcaster.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry<H>> {
        &self.registry
    }

    /// Token cancelled at shutdown.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn one supervised reconnect loop per connector.
    pub fn start(&self, sink: &Arc<dyn EventSink>) {
        for connector in self.connectors.values() {
            let connector = Arc::clone(connector);
            let sink = Arc::clone(sink);
            let cancel = self.cancel.clone();
            let config = self.reconnect;
            self.tasks
                .spawn(async move { supervise(connector, sink, config, cancel).await });
        }
        tracing::info!(connectors = self.connectors.len(), "Venue supervision started");
    }

    // =========================================================================
    // Downstream connections
    // =========================================================================

    /// Register a new downstream connection.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] on an id collision.
    pub fn open_connection(&self, handle: H) -> Result<ConnectionId, SupervisorError> {
        let id = ConnectionId::new();
        self.registry.add_connection(id, handle)?;
        tracing::debug!(connection = %id, "Client connected");
        Ok(id)
    }

    /// Tear down a downstream connection. Idempotent.
    pub fn close_connection(&self, id: ConnectionId) -> Option<RemovedConnection<H>> {
        let removed = self.registry.remove_connection(id);
        if let Some(removed) = &removed {
            tracing::debug!(
                connection = %id,
                symbols = removed.symbols.len(),
                "Client disconnected"
            );
        }
        removed
    }

    /// Subscribe a connection to symbols on a venue.
    ///
    /// Returns the canonical symbols that were applied. Symbols new to the
    /// venue are forwarded upstream; if the venue is down they go out with
    /// the full set on the next reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] for an unknown connection or venue.
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        venue: Venue,
        symbols: &[Symbol],
    ) -> Result<Vec<Symbol>, SupervisorError> {
        let connector = self
            .connectors
            .get(&venue)
            .ok_or(SupervisorError::UnknownVenue(venue))?;
        let symbols = self.canonical_symbols(venue, symbols);

        let changes = self.registry.subscribe(id, &symbols)?;
        if !changes.subscribe.is_empty() {
            tracing::debug!(
                connection = %id,
                symbols = ?changes.subscribe,
                "First subscriber for symbols"
            );
        }

        let fresh = connector.state().accumulate(&symbols);
        if !fresh.is_empty() {
            match connector.subscribe(&fresh).await {
                Ok(()) => {
                    tracing::info!(venue = %venue, symbols = ?fresh, "Subscribed upstream");
                }
                Err(ConnectionError::NotConnected) => {
                    tracing::debug!(
                        venue = %venue,
                        symbols = ?fresh,
                        "Venue not connected, symbols go out on reconnect"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        venue = %venue,
                        error = %e,
                        "Upstream subscribe failed, symbols go out on reconnect"
                    );
                }
            }
        }

        Ok(symbols)
    }

    /// Unsubscribe a connection from symbols.
    ///
    /// Requests carry no venue, so a crypto form the connection holds (for
    /// `ETH-USDT`, `ETH/USDT`) is preferred over the literal form. Upstream
    /// subscriptions are left in place.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Registry`] for an unknown connection.
    pub fn unsubscribe(
        &self,
        id: ConnectionId,
        symbols: &[Symbol],
    ) -> Result<Vec<Symbol>, SupervisorError> {
        let held = self
            .registry
            .connection_symbols(id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        let mut resolved: Vec<Symbol> = Vec::with_capacity(symbols.len());
        for requested in symbols {
            let Some(literal) = self.normalizer.canonical_symbol(Venue::Equity, requested) else {
                continue;
            };
            let symbol = self
                .normalizer
                .canonical_symbol(Venue::Crypto, requested)
                .filter(|crypto| held.contains(crypto))
                .unwrap_or(literal);
            if !resolved.contains(&symbol) {
                resolved.push(symbol);
            }
        }
        self.registry.unsubscribe(id, &resolved)?;
        Ok(resolved)
    }

    /// Canonical, de-duplicated symbols in request order.
    fn canonical_symbols(&self, venue: Venue, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(symbol) = self.normalizer.canonical_symbol(venue, symbol)
                && !out.contains(&symbol)
            {
                out.push(symbol);
            }
        }
        out
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Shared state of the connector for `venue`.
    #[must_use]
    pub fn connector_state(&self, venue: Venue) -> Option<Arc<ConnectorState>> {
        self.connectors.get(&venue).map(|c| c.state())
    }

    /// Snapshot of the connector for `venue`.
    #[must_use]
    pub fn snapshot(&self, venue: Venue) -> Option<ConnectorSnapshot> {
        self.connector_state(venue).map(|state| state.snapshot())
    }

    /// Number of registered downstream connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.connection_count()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Cancel every supervised task and wait up to `grace` for them to exit.
    ///
    /// Returns false if the grace period elapsed first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        let drained = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if drained {
            tracing::info!("Venue connectors stopped");
        } else {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Venue connectors did not stop within grace period"
            );
        }
        drained
    }
}

// =============================================================================
// Supervised reconnect loop
// =============================================================================

async fn supervise(
    connector: Arc<dyn UpstreamConnector>,
    sink: Arc<dyn EventSink>,
    config: ReconnectConfig,
    cancel: CancellationToken,
) {
    let venue = connector.venue();
    let state = connector.state();
    let mut policy = ReconnectPolicy::new(config);

    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => break,
            outcome = connect_and_run(connector.as_ref(), &state, Arc::clone(&sink)) => outcome,
        };

        match outcome {
            Ok(reason) => {
                policy.reset();
                tracing::warn!(venue = %venue, reason = %reason, "Venue connection lost");
            }
            Err(e) => {
                state.record_error(e.to_string());
                tracing::warn!(venue = %venue, error = %e, "Venue connection failed");
            }
        }
        connector.disconnect().await;

        let attempt = state.record_reconnect_attempt();
        let delay = policy.next_delay();
        tracing::info!(
            venue = %venue,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting to venue"
        );

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    connector.disconnect().await;
    tracing::info!(venue = %venue, "Venue supervision stopped");
}

/// One connection cycle: handshake, resubscribe everything, receive.
async fn connect_and_run(
    connector: &dyn UpstreamConnector,
    state: &ConnectorState,
    sink: Arc<dyn EventSink>,
) -> Result<Disconnect, ConnectionError> {
    connector.connect().await?;

    let symbols = state.subscribed_symbols();
    if !symbols.is_empty() {
        connector.subscribe(&symbols).await?;
        tracing::info!(
            venue = %connector.venue(),
            count = symbols.len(),
            "Restored upstream subscriptions"
        );
    }

    Ok(connector.run(sink).await)
}
