//! Venue connector state.
//!
//! One [`ConnectorState`] per venue, shared between the connector's receive
//! loop, the supervisor, and the status endpoints. All mutation goes
//! through its methods.
//!
//! The accumulated symbol set is monotonic: unsubscribes never shrink it,
//! so a reconnect always re-sends every symbol any client has asked for
//! since the process started.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::streaming::{Symbol, Venue, WILDCARD};

/// Lifecycle of an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorLifecycle {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport or venue handshake in progress.
    Connecting,
    /// Handshake complete, receive loop not started.
    Connected,
    /// Receive loop active.
    Running,
}

impl ConnectorLifecycle {
    /// Lowercase label used by the status query and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Running => "running",
        }
    }

    /// Numeric value for the connector state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Running => 3.0,
        }
    }

    /// Connected or running.
    #[must_use]
    pub const fn is_up(&self) -> bool {
        matches!(self, Self::Connected | Self::Running)
    }
}

/// Shared state of one venue connector.
#[derive(Debug)]
pub struct ConnectorState {
    venue: Venue,
    lifecycle: RwLock<ConnectorLifecycle>,
    symbols: RwLock<BTreeSet<Symbol>>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl ConnectorState {
    /// Create a disconnected state with no symbols.
    #[must_use]
    pub const fn new(venue: Venue) -> Self {
        Self {
            venue,
            lifecycle: RwLock::new(ConnectorLifecycle::Disconnected),
            symbols: RwLock::new(BTreeSet::new()),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Venue this state belongs to.
    #[must_use]
    pub const fn venue(&self) -> Venue {
        self.venue
    }

    /// Transition the lifecycle.
    ///
    /// Reaching `Running` resets the reconnect counter and clears the last error.
    pub fn set_lifecycle(&self, lifecycle: ConnectorLifecycle) {
        *self.lifecycle.write() = lifecycle;
        match lifecycle {
            ConnectorLifecycle::Connected => {
                *self.last_connected_at.write() = Some(Utc::now());
            }
            ConnectorLifecycle::Running => {
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                *self.last_error.write() = None;
            }
            ConnectorLifecycle::Disconnected | ConnectorLifecycle::Connecting => {}
        }
    }

    /// Current lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> ConnectorLifecycle {
        *self.lifecycle.read()
    }

    /// Merge symbols into the accumulated set.
    ///
    /// Returns the symbols that were not already present, in sorted order.
    /// The wildcard is never accumulated.
    pub fn accumulate(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut set = self.symbols.write();
        let mut added: Vec<Symbol> = symbols
            .iter()
            .filter(|s| s.as_str() != WILDCARD)
            .filter(|s| set.insert((*s).clone()))
            .cloned()
            .collect();
        added.sort();
        added
    }

    /// Every symbol accumulated so far, sorted.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }

    /// Record a connection or transport error.
    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Count one reconnect attempt. Returns the new total.
    pub fn record_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count one upstream frame.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Reconnect attempts since the last successful run.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Upstream frames received since start.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> ConnectorSnapshot {
        ConnectorSnapshot {
            venue: self.venue,
            status: self.lifecycle(),
            subscribed_symbols: self.subscribed_symbols(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts(),
            messages_received: self.messages_received(),
        }
    }
}

/// Point-in-time view of a [`ConnectorState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSnapshot {
    /// Venue.
    pub venue: Venue,
    /// Lifecycle at snapshot time.
    pub status: ConnectorLifecycle,
    /// Accumulated upstream symbols.
    pub subscribed_symbols: Vec<Symbol>,
    /// Time of the last completed handshake.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent error since the last successful run.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful run.
    pub reconnect_attempts: u32,
    /// Upstream frames received since start.
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn starts_disconnected_and_empty() {
        let state = ConnectorState::new(Venue::Crypto);
        let snap = state.snapshot();
        assert_eq!(snap.status, ConnectorLifecycle::Disconnected);
        assert!(snap.subscribed_symbols.is_empty());
        assert!(snap.last_connected_at.is_none());
        assert_eq!(snap.venue, Venue::Crypto);
    }

    #[test]
    fn accumulate_returns_only_new_symbols() {
        let state = ConnectorState::new(Venue::Equity);
        assert_eq!(state.accumulate(&syms(&["MSFT", "AAPL"])), syms(&["AAPL", "MSFT"]));
        assert_eq!(state.accumulate(&syms(&["AAPL", "TSLA", "TSLA"])), syms(&["TSLA"]));
        assert!(state.accumulate(&syms(&["AAPL"])).is_empty());
        assert_eq!(state.subscribed_symbols(), syms(&["AAPL", "MSFT", "TSLA"]));
    }

    #[test]
    fn wildcard_is_never_accumulated() {
        let state = ConnectorState::new(Venue::Crypto);
        assert!(state.accumulate(&syms(&["*"])).is_empty());
        assert!(state.subscribed_symbols().is_empty());
    }

    #[test]
    fn running_resets_attempts_and_error() {
        let state = ConnectorState::new(Venue::Equity);
        state.record_error("connection refused");
        assert_eq!(state.record_reconnect_attempt(), 1);
        assert_eq!(state.record_reconnect_attempt(), 2);

        state.set_lifecycle(ConnectorLifecycle::Connected);
        assert_eq!(state.reconnect_attempts(), 2);
        assert!(state.snapshot().last_connected_at.is_some());

        state.set_lifecycle(ConnectorLifecycle::Running);
        assert_eq!(state.reconnect_attempts(), 0);
        assert!(state.snapshot().last_error.is_none());
    }

    #[test]
    fn message_counter() {
        let state = ConnectorState::new(Venue::Crypto);
        state.record_message();
        state.record_message();
        assert_eq!(state.messages_received(), 2);
    }

    #[test]
    fn lifecycle_labels() {
        assert_eq!(ConnectorLifecycle::Running.as_str(), "running");
        assert_eq!(
            serde_json::to_string(&ConnectorLifecycle::Connecting).unwrap(),
            r#""connecting""#
        );
        assert!(ConnectorLifecycle::Connected.is_up());
        assert!(!ConnectorLifecycle::Connecting.is_up());
    }
}
