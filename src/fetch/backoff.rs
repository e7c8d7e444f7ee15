//! Exponential backoff for retryable remote failures.

use std::time::Duration;

/// Backoff schedule: `base * 2^attempt`, capped, but never shorter than the
/// server's retry-after hint.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_retries: 4,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let computed = self.base.saturating_mul(factor).min(self.max);
        match hint {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }

    /// Whether another retry is allowed after `attempt` retries.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
