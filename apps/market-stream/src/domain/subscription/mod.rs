//! Subscription Registry
//!
//! Tracks which symbols each downstream connection wants and, in reverse,
//! which connections want each symbol.
//!
//! # Design
//!
//! Both directions live behind one [`RwLock`], so every mutation updates the
//! per-connection set and the reverse index together:
//!
//! - `connections`: connection id -> subscribed symbols + outbound handle
//! - `index`: symbol -> connection ids (the fan-out hot path)
//!
//! Wildcard holders are indexed under [`WILDCARD`], which makes
//! [`SubscriptionRegistry::subscribers_for`] two hash lookups regardless of
//! how many connections exist.
//!
//! The registry is generic over the outbound handle `H` so the domain layer
//! stays free of transport types. Fan-out runs under the read lock via
//! [`SubscriptionRegistry::for_each_subscriber`]; removal takes the write
//! lock, so delivery never overlaps the teardown of the same connection.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::streaming::{Symbol, WILDCARD};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Operation on a connection that is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Connection id already registered.
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Index-level effect of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that gained their first subscriber.
    pub subscribe: HashSet<Symbol>,
    /// Symbols that lost their last subscriber.
    pub unsubscribe: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// A connection taken out of the registry.
#[derive(Debug)]
pub struct RemovedConnection<H> {
    /// Outbound handle the connection was registered with.
    pub handle: H,
    /// Symbols the connection held at removal, sorted.
    pub symbols: Vec<Symbol>,
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug)]
struct ConnectionEntry<H> {
    symbols: HashSet<Symbol>,
    handle: H,
}

#[derive(Debug)]
struct RegistryState<H> {
    connections: HashMap<ConnectionId, ConnectionEntry<H>>,
    index: HashMap<Symbol, HashSet<ConnectionId>>,
}

impl<H> Default for RegistryState<H> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<H> RegistryState<H> {
    /// Drop `id` from the index entry of `symbol`, pruning empty entries.
    ///
    /// Returns true if the symbol has no subscribers left.
    fn unindex(&mut self, symbol: &str, id: ConnectionId) -> bool {
        let Some(ids) = self.index.get_mut(symbol) else {
            return false;
        };
        ids.remove(&id);
        if ids.is_empty() {
            self.index.remove(symbol);
            return true;
        }
        false
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe many-to-many map between connections and symbols.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscription::{ConnectionId, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let a = ConnectionId::new();
/// let b = ConnectionId::new();
/// registry.add_connection(a, ()).unwrap();
/// registry.add_connection(b, ()).unwrap();
///
/// registry.subscribe(a, &["BTC/USDT".to_string()]).unwrap();
/// registry.subscribe(b, &["*".to_string()]).unwrap();
///
/// assert_eq!(registry.subscribers_for("BTC/USDT").len(), 2);
/// assert_eq!(registry.subscribers_for("ETH/USDT").len(), 1);
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<H> {
    state: RwLock<RegistryState<H>>,
}

impl<H> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }
}

impl<H> SubscriptionRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with an empty subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateConnection`] if `id` is already present.
    pub fn add_connection(&self, id: ConnectionId, handle: H) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if state.connections.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        state.connections.insert(
            id,
            ConnectionEntry {
                symbols: HashSet::new(),
                handle,
            },
        );
        Ok(())
    }

    /// Remove a connection and every index entry pointing at it.
    ///
    /// Idempotent: returns `None` if the connection is already gone.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<RemovedConnection<H>> {
        let mut state = self.state.write();
        let entry = state.connections.remove(&id)?;

        for symbol in &entry.symbols {
            state.unindex(symbol, id);
        }

        let mut symbols: Vec<Symbol> = entry.symbols.into_iter().collect();
        symbols.sort();
        Some(RemovedConnection {
            handle: entry.handle,
            symbols,
        })
    }

    /// Add symbols to a connection's set.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not registered.
    pub fn subscribe(
        &self,
        id: ConnectionId,
        symbols: &[Symbol],
    ) -> Result<SubscriptionChanges, RegistryError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let mut changes = SubscriptionChanges::default();
        for symbol in symbols {
            if !entry.symbols.insert(symbol.clone()) {
                continue;
            }
            let ids = state.index.entry(symbol.clone()).or_default();
            if ids.is_empty() {
                changes.subscribe.insert(symbol.clone());
            }
            ids.insert(id);
        }
        Ok(changes)
    }

    /// Remove symbols from a connection's set. Symbols it does not hold are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not registered.
    pub fn unsubscribe(
        &self,
        id: ConnectionId,
        symbols: &[Symbol],
    ) -> Result<SubscriptionChanges, RegistryError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let removed: Vec<&Symbol> = symbols
            .iter()
            .filter(|symbol| entry.symbols.remove(*symbol))
            .collect();

        let mut changes = SubscriptionChanges::default();
        for symbol in removed {
            if state.unindex(symbol, id) {
                changes.unsubscribe.insert(symbol.clone());
            }
        }
        Ok(changes)
    }

    /// Connections subscribed to `symbol`, including wildcard holders.
    #[must_use]
    pub fn subscribers_for(&self, symbol: &str) -> HashSet<ConnectionId> {
        let mut ids = HashSet::new();
        self.for_each_subscriber(symbol, |id, _| {
            ids.insert(id);
        });
        ids
    }

    /// Visit each subscriber of `symbol` exactly once under the read lock.
    ///
    /// `visit` must not block and must not call back into the registry.
    pub fn for_each_subscriber<F>(&self, symbol: &str, mut visit: F) -> usize
    where
        F: FnMut(ConnectionId, &H),
    {
        let state = self.state.read();
        let direct = state.index.get(symbol);
        let wildcard = (symbol != WILDCARD)
            .then(|| state.index.get(WILDCARD))
            .flatten();

        let mut visited = 0;
        let ids = direct
            .into_iter()
            .flatten()
            .chain(
                wildcard
                    .into_iter()
                    .flatten()
                    .filter(|id| direct.is_none_or(|d| !d.contains(*id))),
            );
        for id in ids {
            if let Some(entry) = state.connections.get(id) {
                visit(*id, &entry.handle);
                visited += 1;
            }
        }
        visited
    }

    /// Symbols held by a connection, sorted.
    #[must_use]
    pub fn connection_symbols(&self, id: ConnectionId) -> Option<Vec<Symbol>> {
        let state = self.state.read();
        let entry = state.connections.get(&id)?;
        let mut symbols: Vec<Symbol> = entry.symbols.iter().cloned().collect();
        symbols.sort();
        Some(symbols)
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Snapshot statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            connection_count: state.connections.len(),
            symbol_count: state
                .index
                .keys()
                .filter(|symbol| symbol.as_str() != WILDCARD)
                .count(),
            wildcard_count: state.index.get(WILDCARD).map_or(0, HashSet::len),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered connections.
    pub connection_count: usize,
    /// Distinct symbols with at least one explicit subscriber.
    pub symbol_count: usize,
    /// Connections holding the wildcard.
    pub wildcard_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
