//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the HTTP
//! surfaces and process-wide concerns.

/// Upstream venue WebSocket connectors.
pub mod venue;

/// Fan-out broadcaster and per-client outbound queues.
pub mod broadcast;

/// Downstream WebSocket and status HTTP server.
pub mod server;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
