//! Retry backoff policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between retries of one call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (ms)
    pub initial_backoff_ms: u64,

    /// Ceiling for any single delay (ms)
    pub max_backoff_ms: u64,

    /// Growth factor per attempt
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// No waiting between retries
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Backoff ceiling
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let with_jitter = if self.use_jitter {
            let jitter = capped * 0.25 * rand::random::<f64>();
            (capped + jitter).min(self.max_backoff_ms as f64)
        } else {
            capped
        };

        Duration::from_millis(with_jitter.max(0.0) as u64)
    }
}
