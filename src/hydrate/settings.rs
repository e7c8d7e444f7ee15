//! Hydration tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::Backoff;
use crate::types::{MAX_BATCH_SIZE, SECS_PER_DAY};

/// How reply counts are obtained when the bulk view lacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ReplyStrategy {
    /// Trust the bulk view; missing reply counts are zero.
    Bulk,
    /// Per-item thread lookup for posts newer than `cutoff_days`
    /// (0 looks up every post). Older posts keep their reply count.
    Thread { cutoff_days: u32 },
    /// Never look up replies; posts keep their reply count.
    Skip,
}

impl Default for ReplyStrategy {
    fn default() -> Self {
        ReplyStrategy::Thread { cutoff_days: 30 }
    }
}

impl ReplyStrategy {
    /// Whether a post created at `created_at` gets a thread lookup.
    pub fn wants_lookup(&self, created_at: i64, now: i64) -> bool {
        match *self {
            ReplyStrategy::Thread { cutoff_days: 0 } => true,
            ReplyStrategy::Thread { cutoff_days } => {
                now.saturating_sub(created_at) < i64::from(cutoff_days) * SECS_PER_DAY
            }
            ReplyStrategy::Bulk | ReplyStrategy::Skip => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HydrationSettings {
    /// Uris per bulk call, clamped to `MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub max_concurrency: usize,
    /// Timeout applied to each remote call, for apis that do not bound
    /// their own requests.
    pub call_timeout: Duration,
    pub backoff: Backoff,
    /// Stop dispatching new batches once this much time has passed.
    pub time_budget: Option<Duration>,
    pub reply_strategy: ReplyStrategy,
}

impl Default for HydrationSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            max_concurrency: 5,
            call_timeout: Duration::from_secs(5),
            backoff: Backoff::default(),
            time_budget: None,
            reply_strategy: ReplyStrategy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_cutoff() {
        let now = 100 * SECS_PER_DAY;
        let strategy = ReplyStrategy::Thread { cutoff_days: 30 };
        assert!(strategy.wants_lookup(now - 2 * SECS_PER_DAY, now));
        assert!(!strategy.wants_lookup(now - 40 * SECS_PER_DAY, now));
        assert!(ReplyStrategy::Thread { cutoff_days: 0 }.wants_lookup(0, now));
        assert!(!ReplyStrategy::Skip.wants_lookup(now, now));
    }
}
