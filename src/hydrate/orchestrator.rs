//! The hydration pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use crate::cache::{ttl_for_item, CacheEntry, EngagementCache};
use crate::fetch::RemoteApi;
use crate::types::{now_secs, ContentItem, ContentType, SkyError, SkyResult};

use super::batch::plan_batches;
use super::report::HydrationReport;
use super::settings::HydrationSettings;
use super::worker::{run_batch, BatchJob, BatchResult, WorkerContext};

/// Progress callback: `(completed, total)` posts.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Fills engagement counts on post items. Holds no per-pass state; the
/// item slice and cache handle are passed to each call.
pub struct Hydrator {
    api: Arc<dyn RemoteApi>,
    settings: HydrationSettings,
    cancel: Option<Arc<AtomicBool>>,
}

impl Hydrator {
    pub fn new(api: Arc<dyn RemoteApi>, settings: HydrationSettings) -> Self {
        Self {
            api,
            settings,
            cancel: None,
        }
    }

    /// Stop dispatching new batches once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn settings(&self) -> &HydrationSettings {
        &self.settings
    }

    /// Hydrate `items` in place.
    pub async fn hydrate(
        &self,
        items: &mut [ContentItem],
        cache: &EngagementCache,
        progress: Option<ProgressFn<'_>>,
    ) -> SkyResult<HydrationReport> {
        self.hydrate_at(items, cache, progress, now_secs()).await
    }

    /// Hydrate `items` in place, using `now` for cache freshness and TTLs.
    ///
    /// Only `Post` items are touched. Returns `HydrationFailed` only when
    /// batches were sent and none succeeded.
    pub async fn hydrate_at(
        &self,
        items: &mut [ContentItem],
        cache: &EngagementCache,
        progress: Option<ProgressFn<'_>>,
        now: i64,
    ) -> SkyResult<HydrationReport> {
        let mut report = HydrationReport {
            total: items.len(),
            ..Default::default()
        };

        // uri -> positions of the posts carrying it
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if item.content_type != ContentType::Post {
                report.not_applicable += 1;
                continue;
            }
            positions
                .entry(item.uri.clone())
                .or_insert_with(|| {
                    order.push(item.uri.clone());
                    Vec::new()
                })
                .push(i);
        }
        let hydratable = report.hydratable();

        // Step 1-2: serve fresh cache entries. An entry without a reply count
        // is a miss for posts that are due a reply lookup.
        let cached = match cache.get_batch_at(&order, now) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("cache read failed, treating every post as a miss: {}", e);
                HashMap::new()
            }
        };
        let mut misses = Vec::new();
        for uri in &order {
            let created_at = items[positions[uri][0]].created_at;
            match cached.get(uri) {
                Some(entry)
                    if entry.reply_count.is_some()
                        || !self.settings.reply_strategy.wants_lookup(created_at, now) =>
                {
                    for &i in &positions[uri] {
                        entry.apply_to(&mut items[i]);
                        report.cached_count += 1;
                    }
                }
                _ => misses.push((uri.clone(), created_at)),
            }
        }
        log::info!(
            "hydration: {} posts, {} cached, {} to fetch",
            hydratable,
            report.cached_count,
            hydratable - report.cached_count
        );

        if misses.is_empty() {
            return Ok(report);
        }

        // Step 3-6: bounded fan-out over batches
        let batches = plan_batches(&misses, self.settings.batch_size);
        let total_batches = batches.len();
        let ctx = WorkerContext {
            call_timeout: (!self.api.times_out_requests()).then_some(self.settings.call_timeout),
            backoff: self.settings.backoff,
            reply_strategy: self.settings.reply_strategy,
            now,
            cancel: self.cancel.clone(),
        };
        let started = Instant::now();
        let max_in_flight = self.settings.max_concurrency.max(1);

        let mut pending = batches.into_iter().enumerate();
        let mut tasks: JoinSet<BatchResult> = JoinSet::new();
        let mut completed = report.cached_count;
        let mut succeeded = 0usize;

        loop {
            while !report.stopped_early && tasks.len() < max_in_flight {
                if self.should_stop(started) {
                    report.stopped_early = true;
                    break;
                }
                let Some((index, posts)) = pending.next() else {
                    break;
                };
                report.batches_issued += 1;
                tasks.spawn(run_batch(
                    Arc::clone(&self.api),
                    BatchJob { index, posts },
                    ctx.clone(),
                ));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("hydration task aborted: {}", e);
                    report.batches_failed += 1;
                    continue;
                }
            };

            report.retries += result.retries;
            report.reply_lookups += result.reply_lookups;
            match result.outcome {
                Ok(counts) => {
                    succeeded += 1;
                    report.not_found += result.not_found;
                    let mut entries = Vec::with_capacity(counts.len());
                    for (uri, fetched) in counts {
                        let Some(at) = positions.get(&uri) else {
                            continue;
                        };
                        let entry = CacheEntry {
                            uri,
                            like_count: fetched.likes,
                            repost_count: fetched.reposts,
                            reply_count: fetched.replies,
                            last_updated_at: now,
                            ttl_seconds: ttl_for_item(&items[at[0]], now),
                        };
                        for &i in at {
                            entry.apply_to(&mut items[i]);
                            report.fetched_count += 1;
                        }
                        entries.push(entry);
                    }
                    if let Err(e) = cache.put_entries(&entries) {
                        log::warn!("batch {}: cache write failed: {}", result.index, e);
                        report.cache_write_failures += 1;
                    }
                    if result.item_failures > 0 {
                        log::debug!(
                            "batch {}: {} posts left unhydrated",
                            result.index,
                            result.item_failures
                        );
                    }
                }
                Err(e) => {
                    log::warn!(
                        "batch {} ({} posts) gave up: {}",
                        result.index,
                        result.size,
                        e
                    );
                    report.batches_failed += 1;
                }
            }

            completed += result.size;
            if let Some(callback) = progress {
                callback(completed.min(hydratable), hydratable);
            }
        }

        report.unhydrated = hydratable - report.cached_count - report.fetched_count;
        log::info!(
            "hydration done: {} batches of {} sent, {} failed",
            report.batches_issued,
            total_batches,
            report.batches_failed
        );

        if report.batches_issued > 0 && succeeded == 0 {
            return Err(SkyError::HydrationFailed {
                attempted: report.batches_issued,
                unhydrated: report.unhydrated,
            });
        }
        Ok(report)
    }

    fn should_stop(&self, started: Instant) -> bool {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            log::info!("hydration cancelled");
            return true;
        }
        if let Some(budget) = self.settings.time_budget {
            if started.elapsed() >= budget {
                log::info!("hydration time budget of {:?} exhausted", budget);
                return true;
            }
        }
        false
    }
}
