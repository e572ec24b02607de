//! Fan-out Broadcaster
//!
//! Delivers each canonical event to every subscribed downstream client
//! without blocking the venue receive loop.
//!
//! # Architecture
//!
//! Every client owns a bounded outbound queue drained by its own writer task.
//! [`Broadcaster::publish`] serializes the event once, resolves subscribers
//! from the registry, and `try_send`s the shared frame into each queue. A
//! client whose queue is full or closed is removed from the registry and
//! signalled to close; the remaining subscribers are unaffected and the
//! missed event is never replayed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::EventSink;
use crate::domain::streaming::{CanonicalEvent, Symbol};
use crate::domain::subscription::{ConnectionId, SubscriptionRegistry};
use crate::infrastructure::metrics::{self, EvictionReason};
use crate::infrastructure::server::protocol::ServerMessage;

/// Default per-client outbound queue capacity.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 1024;

/// Registry of downstream clients keyed by their outbound handle.
pub type ClientRegistry = SubscriptionRegistry<ClientHandle>;

/// Serialized text frame shared by every recipient.
pub type Frame = Arc<str>;

// =============================================================================
// Errors
// =============================================================================

/// Failure to hand a frame to one client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Outbound queue is saturated.
    #[error("outbound queue full")]
    QueueFull,

    /// Writer task has gone away.
    #[error("outbound queue closed")]
    Closed,

    /// Socket write failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl DeliveryError {
    /// Metric label for an eviction caused by this error.
    #[must_use]
    pub const fn eviction_reason(&self) -> EvictionReason {
        match self {
            Self::QueueFull => EvictionReason::QueueFull,
            Self::Closed => EvictionReason::Closed,
            Self::WriteFailed(_) => EvictionReason::WriteFailed,
        }
    }
}

// =============================================================================
// Client Handle / Outbox
// =============================================================================

#[derive(Debug, Default)]
struct Eviction {
    token: CancellationToken,
    symbols: Mutex<Option<Vec<Symbol>>>,
}

/// Sending side of a client's outbound queue, stored in the registry.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    outbound: mpsc::Sender<Frame>,
    eviction: Arc<Eviction>,
}

/// Receiving side of a client's outbound queue, owned by its writer task.
#[derive(Debug)]
pub struct ClientOutbox {
    inbound: mpsc::Receiver<Frame>,
    eviction: Arc<Eviction>,
}

/// What the writer task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write this frame.
    Frame(Frame),
    /// The broadcaster pruned the client holding these symbols.
    Evicted(Vec<Symbol>),
    /// Every handle is gone.
    Closed,
}

impl ClientHandle {
    /// Create a handle and outbox pair with a bounded queue.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ClientOutbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let eviction = Arc::new(Eviction::default());
        (
            Self {
                outbound: tx,
                eviction: Arc::clone(&eviction),
            },
            ClientOutbox {
                inbound: rx,
                eviction,
            },
        )
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] or [`DeliveryError::Closed`].
    pub fn try_deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.outbound
            .try_send(Arc::clone(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Queue a control frame, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the writer is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Tell the writer to send an eviction notice and close.
    ///
    /// Only the first call's symbols are kept.
    pub fn evict(&self, symbols: Vec<Symbol>) {
        {
            let mut slot = self.eviction.symbols.lock();
            if slot.is_none() {
                *slot = Some(symbols);
            }
        }
        self.eviction.token.cancel();
    }

    /// Whether this client has been evicted.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.eviction.token.is_cancelled()
    }
}

impl ClientOutbox {
    /// Wait for the next frame or the eviction signal. Eviction wins.
    pub async fn next(&mut self) -> Outbound {
        tokio::select! {
            biased;
            () = self.eviction.token.cancelled() => {
                Outbound::Evicted(self.eviction.symbols.lock().take().unwrap_or_default())
            }
            frame = self.inbound.recv() => frame.map_or(Outbound::Closed, Outbound::Frame),
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fan-out counters.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    published: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time copy of [`BroadcastStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStatsSnapshot {
    /// Events published.
    pub published: u64,
    /// Frames queued to clients.
    pub delivered: u64,
    /// Clients evicted.
    pub evicted: u64,
}

/// Fan-out broadcaster over the client registry.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    stats: BroadcastStats,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            stats: BroadcastStats::default(),
        }
    }

    /// Registry shared with the supervisor.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Remove a client and signal its writer to close.
    ///
    /// Returns false if the client was already gone.
    pub fn evict(&self, id: ConnectionId, reason: EvictionReason) -> bool {
        let Some(removed) = self.registry.remove_connection(id) else {
            return false;
        };
        tracing::warn!(
            connection = %id,
            reason = reason.as_str(),
            symbols = removed.symbols.len(),
            "Evicting downstream client"
        );
        removed.handle.evict(removed.symbols);
        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
        metrics::record_eviction(reason);
        metrics::set_downstream_connections(self.registry.connection_count());
        true
    }

    /// Snapshot counters.
    #[must_use]
    pub fn stats(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            published: self.stats.published.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for Broadcaster {
    fn publish(&self, event: CanonicalEvent) {
        let started = Instant::now();
        let symbol = event.symbol().to_string();
        let frame: Frame = match ServerMessage::market_data(event).to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(symbol = %symbol, error = %e, "Failed to serialize event");
                return;
            }
        };
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        let mut dead: Vec<(ConnectionId, DeliveryError)> = Vec::new();
        let visited = self.registry.for_each_subscriber(&symbol, |id, handle| {
            if let Err(e) = handle.try_deliver(&frame) {
                dead.push((id, e));
            }
        });

        let delivered = (visited - dead.len()) as u64;
        self.stats.delivered.fetch_add(delivered, Ordering::Relaxed);
        metrics::record_deliveries(delivered);

        for (id, error) in dead {
            self.evict(id, error.eviction_reason());
        }

        metrics::record_fanout_duration(started.elapsed());
    }
}
