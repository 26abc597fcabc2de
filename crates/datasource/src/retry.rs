//! Backoff between chunk download attempts.

use std::time::Duration;

use rand::RngExt;

/// Exponential backoff with an upper bound and optional jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
    /// No delay exceeds this, jitter included.
    pub max_delay: Duration,
    /// Adds up to `base_delay / 2` so concurrent chunks do not retry in lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Attempts >= 32 saturate instead of overflowing the shift.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit_ms = jitter_range_ms.min(remaining_ms);
        if limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}
