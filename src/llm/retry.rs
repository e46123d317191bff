//! Backoff schedule for completion retries.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base_delay * 2^n` after the n-th failed attempt
/// (0-based), capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another attempt is allowed after `failed_attempt` (0-based) failed.
    pub fn should_retry(&self, failed_attempt: u32) -> bool {
        failed_attempt + 1 < self.attempts
    }

    /// Delay before the attempt following `failed_attempt` (0-based).
    ///
    /// A server `retry_after` hint can lengthen the delay but never past
    /// `max_delay`. Deterministic; jitter is applied separately.
    pub fn delay_for(&self, failed_attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after {
            Some(hint) => backoff.max(hint.min(self.max_delay)),
            None => backoff,
        }
    }

    /// Add up to 10% random jitter, still capped at `max_delay`.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        let spread = delay.as_millis() as u64 / 10;
        if spread == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max_delay.max(delay))
    }
}
