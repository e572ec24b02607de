//! Reconnection Policy
//!
//! Fixed delay between upstream reconnect attempts, with optional jitter.
//! Attempts are unlimited; the delay never drops below [`MIN_RECONNECT_DELAY`]
//! so a venue that refuses every connection cannot hot-loop the supervisor.

use std::time::Duration;

use rand::Rng;

/// Lower bound applied to every configured and jittered delay.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before each reconnection attempt.
    pub delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration, clamping the delay to [`MIN_RECONNECT_DELAY`]
    /// and the jitter factor to `0.0..=1.0`.
    #[must_use]
    pub fn new(delay: Duration, jitter_factor: f64) -> Self {
        let jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            delay: delay.max(MIN_RECONNECT_DELAY),
            jitter_factor,
        }
    }
}

/// Reconnection policy tracking attempts for one connector.
///
/// # Example
///
/// ```rust
/// use market_stream::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::new(Duration::from_secs(5), 0.0));
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.next_delay(), Duration::from_secs(5));
/// assert_eq!(policy.attempt_count(), 2);
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt. Never fails: retries are indefinite.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.apply_jitter(self.config.delay).max(MIN_RECONNECT_DELAY)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
