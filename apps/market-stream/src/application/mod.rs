//! Application Layer - Use cases and port definitions.
//!
//! The supervisor and its reconnect policy, written against the ports that
//! the infrastructure adapters implement.

/// Port interfaces for upstream connectors and event delivery.
pub mod ports;

/// Connection lifecycle supervision.
pub mod services;
