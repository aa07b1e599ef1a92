//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before retry number `retry` (1-based). Zero base means no delay.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 || self.base_ms == 0 {
            return Duration::ZERO;
        }

        let capped = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(retry - 1))
            .min(self.max_ms);

        // Up to 10% extra so synchronized clients spread out.
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }
}
