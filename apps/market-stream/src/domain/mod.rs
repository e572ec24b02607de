//! Domain Layer - Core streaming types and business logic.
//!
//! Canonical events, the frame normalizer, the subscription registry and
//! per-venue connector state. Nothing here performs I/O.

/// Canonical market data events and venue normalization.
pub mod streaming;

/// Subscription registry (connection <-> symbol index).
pub mod subscription;

/// Upstream connector lifecycle and accumulated symbols.
pub mod connector;
