//! Configuration Module
//!
//! Environment-driven configuration for the market stream service.

mod settings;

pub use settings::{ConfigError, MarketStreamConfig, ServerSettings, UpstreamSettings};
