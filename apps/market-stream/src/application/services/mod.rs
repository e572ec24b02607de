//! Application Services
//!
//! - [`Supervisor`]: accepts downstream connections, routes their
//!   subscriptions, and keeps every venue connector alive.
//! - [`ReconnectPolicy`]: delay between upstream reconnect attempts.

/// Upstream reconnect delay policy.
pub mod reconnect;

/// Connection lifecycle supervisor.
pub mod supervisor;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{Supervisor, SupervisorError};
