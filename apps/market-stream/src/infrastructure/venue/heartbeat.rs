//! Heartbeat Manager
//!
//! Keeps an upstream connection honest: asks the receive loop to ping on a
//! fixed interval and signals a timeout when no frame of any kind has arrived
//! within the read timeout, which is how half-open connections are detected.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shortest ping interval the manager will run with.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames, floored at [`MIN_PING_INTERVAL`].
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub read_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, read_timeout: Duration) -> Self {
        Self {
            ping_interval,
            read_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// Read timeout elapsed; the connection should be dropped.
    Timeout,
}

/// Liveness state shared between the manager and the receive loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_frame: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state that treats "now" as the last frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame (data, ping, pong, anything) arrived.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Time since the last frame.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_frame.read().elapsed()
    }
}

/// Heartbeat manager driving one connection.
///
/// Runs until cancelled, until it reports a timeout, or until the event
/// receiver is dropped.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat monitoring loop.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(MIN_PING_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false once the loop should stop.
    async fn check_and_ping(&self) -> bool {
        let idle = self.state.idle();
        if idle > self.config.read_timeout {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                timeout_secs = self.config.read_timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return false;
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return false;
        }
        true
    }
}
