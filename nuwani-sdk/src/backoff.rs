//! Reconnection delay policies.

use std::time::Duration;

use serde::Deserialize;

/// Decides how long a [`Connection`](crate::connection::Connection) waits
/// before its next connection attempt.
pub trait BackoffPolicy: Send {
    /// Delay before the next attempt, in milliseconds.
    fn time_to_next_request_ms(&mut self) -> u64;

    fn mark_request_successful(&mut self);

    fn mark_request_failed(&mut self);

    fn time_to_next_request(&mut self) -> Duration {
        Duration::from_millis(self.time_to_next_request_ms())
    }
}

/// Settings for [`ExponentialBackoff`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay.
    pub max_delay_ms: u64,
    /// Multiplier applied for every further consecutive failure.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
            factor: 2.0,
        }
    }
}

/// Exponential backoff: no delay until something fails, then
/// `initial * factor^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn time_to_next_request_ms(&mut self) -> u64 {
        if self.consecutive_failures == 0 {
            return 0;
        }
        let exponent = (self.consecutive_failures - 1).min(63) as i32;
        let delay = self.config.initial_delay_ms as f64 * self.config.factor.max(1.0).powi(exponent);
        (delay as u64).min(self.config.max_delay_ms)
    }

    fn mark_request_successful(&mut self) {
        self.consecutive_failures = 0;
    }

    fn mark_request_failed(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
