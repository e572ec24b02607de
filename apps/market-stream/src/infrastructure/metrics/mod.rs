//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received, decode errors, connection errors,
//!   reconnects, connector state and subscribed symbols per venue
//! - **Fan-out**: events published, deliveries, evictions, fan-out latency
//! - **Downstream**: connected clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connector::ConnectorLifecycle;
use crate::domain::streaming::{EventKind, Venue};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Subsequent calls return the same handle.
///
/// # Errors
///
/// Returns [`BuildError`] if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "market_stream_messages_received_total",
        "Frames received from upstream venues"
    );
    describe_counter!(
        "market_stream_decode_errors_total",
        "Upstream frames dropped as undecodable"
    );
    describe_counter!(
        "market_stream_connection_errors_total",
        "Upstream connection and handshake failures"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "market_stream_connector_state",
        "Connector lifecycle (0 disconnected, 1 connecting, 2 connected, 3 running)"
    );
    describe_gauge!(
        "market_stream_upstream_symbols",
        "Symbols in the accumulated upstream subscription set"
    );

    // Fan-out
    describe_counter!(
        "market_stream_events_published_total",
        "Canonical events handed to the broadcaster"
    );
    describe_counter!(
        "market_stream_deliveries_total",
        "Events queued to downstream clients"
    );
    describe_counter!(
        "market_stream_evictions_total",
        "Downstream clients pruned by the broadcaster"
    );
    describe_histogram!(
        "market_stream_fanout_duration_seconds",
        "Time to fan one event out to its subscribers"
    );

    // Downstream
    describe_gauge!(
        "market_stream_downstream_connections",
        "Connected downstream clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why the broadcaster pruned a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Outbound queue was full.
    QueueFull,
    /// Outbound queue receiver was gone.
    Closed,
    /// Socket write failed in the writer task.
    WriteFailed,
}

impl EvictionReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
            Self::WriteFailed => "write_failed",
        }
    }
}

/// Record a frame received from a venue.
pub fn record_message_received(venue: Venue) {
    counter!(
        "market_stream_messages_received_total",
        "venue" => venue.as_str()
    )
    .increment(1);
}

/// Record an undecodable frame.
pub fn record_decode_error(venue: Venue) {
    counter!(
        "market_stream_decode_errors_total",
        "venue" => venue.as_str()
    )
    .increment(1);
}

/// Record an upstream connection failure.
pub fn record_connection_error(venue: Venue, error_type: &'static str) {
    counter!(
        "market_stream_connection_errors_total",
        "venue" => venue.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect(venue: Venue) {
    counter!(
        "market_stream_reconnects_total",
        "venue" => venue.as_str()
    )
    .increment(1);
}

/// Update the connector lifecycle gauge.
pub fn set_connector_state(venue: Venue, lifecycle: ConnectorLifecycle) {
    gauge!(
        "market_stream_connector_state",
        "venue" => venue.as_str()
    )
    .set(lifecycle.as_gauge());
}

/// Update the accumulated upstream symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_symbols(venue: Venue, count: usize) {
    gauge!(
        "market_stream_upstream_symbols",
        "venue" => venue.as_str()
    )
    .set(count as f64);
}

/// Record an event handed to the broadcaster.
pub fn record_event_published(venue: Venue, kind: EventKind) {
    counter!(
        "market_stream_events_published_total",
        "venue" => venue.as_str(),
        "event_type" => kind.as_str()
    )
    .increment(1);
}

/// Record events queued to downstream clients.
pub fn record_deliveries(count: u64) {
    counter!("market_stream_deliveries_total").increment(count);
}

/// Record a pruned downstream client.
pub fn record_eviction(reason: EvictionReason) {
    counter!(
        "market_stream_evictions_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record one fan-out pass.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("market_stream_fanout_duration_seconds").record(duration.as_secs_f64());
}

/// Update the downstream connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_connections(count: usize) {
    gauge!("market_stream_downstream_connections").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
