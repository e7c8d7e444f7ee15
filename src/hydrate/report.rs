//! Outcome of one hydration pass.

use serde::Serialize;

/// Counters from [`Hydrator::hydrate`](super::Hydrator::hydrate).
/// `cached_count + fetched_count + unhydrated == total - not_applicable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    /// Items passed in.
    pub total: usize,
    /// Likes and reposts, which carry no engagement of their own.
    pub not_applicable: usize,
    /// Posts served from fresh cache entries.
    pub cached_count: usize,
    /// Posts updated from the remote API.
    pub fetched_count: usize,
    /// Posts left with their previous counts.
    pub unhydrated: usize,
    /// Posts the remote API no longer returns.
    pub not_found: usize,
    pub batches_issued: usize,
    pub batches_failed: usize,
    pub retries: usize,
    pub reply_lookups: usize,
    pub cache_write_failures: usize,
    /// Set when the time budget or cancellation stopped dispatch.
    pub stopped_early: bool,
}

impl HydrationReport {
    /// Number of posts considered for hydration.
    pub fn hydratable(&self) -> usize {
        self.total - self.not_applicable
    }

    /// True when every post got counts.
    pub fn is_complete(&self) -> bool {
        self.unhydrated == 0
    }

    /// One-line message for the user.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "hydrated {} of {} posts ({} cached, {} fetched)",
            self.cached_count + self.fetched_count,
            self.hydratable(),
            self.cached_count,
            self.fetched_count
        );
        if self.unhydrated > 0 {
            line.push_str(&format!("; {} unhydrated", self.unhydrated));
            if self.batches_failed > 0 {
                line.push_str(&format!(
                    " after {} of {} batches failed, retry later",
                    self.batches_failed, self.batches_issued
                ));
            }
        }
        if self.stopped_early {
            line.push_str("; stopped before all batches were sent");
        }
        line
    }
}
