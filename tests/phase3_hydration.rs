//! Phase 3 tests: the hydration orchestrator against a scripted remote API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use skyvault::cache::{ttl_for_age, EngagementCache};
use skyvault::fetch::{Backoff, PostView, RecordPage, RemoteApi};
use skyvault::hydrate::{HydrationSettings, Hydrator, ReplyStrategy};
use skyvault::types::{
    ContentItem, ContentItemBuilder, ContentType, EngagementCounts, SkyError, SkyResult,
    MAX_BATCH_SIZE, SECS_PER_DAY,
};

const NOW: i64 = 1_720_000_000;

/// Remote API double. Counts are derived from the uri's trailing number so
/// results are predictable; failures are scripted per call.
#[derive(Default)]
struct MockApi {
    batch_sizes: Mutex<Vec<usize>>,
    /// Calls to `get_posts` (0-based) that answer with a rate limit.
    throttled_calls: Mutex<HashSet<usize>>,
    /// Uris whose batch is always throttled.
    poisoned: Mutex<HashSet<String>>,
    /// Uris the bulk view omits.
    missing: HashSet<String>,
    /// Leave reply counts out of the bulk view.
    omit_replies: bool,
    /// Leave like and repost counts out of the bulk view.
    omit_likes_reposts: bool,
    calls: AtomicUsize,
    reply_lookups: AtomicUsize,
    like_lookups: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

fn number(uri: &str) -> u64 {
    uri.rsplit('/').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

fn expected_counts(uri: &str) -> EngagementCounts {
    let n = number(uri);
    EngagementCounts::new(n, n % 7, n % 3)
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn list_records(
        &self,
        _repo: &str,
        _collection: &str,
        _cursor: Option<&str>,
        _limit: usize,
    ) -> SkyResult<RecordPage> {
        Ok(RecordPage::default())
    }

    async fn get_posts(&self, uris: &[String]) -> SkyResult<Vec<PostView>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.batch_sizes.lock().unwrap().push(uris.len());
        assert!(uris.len() <= MAX_BATCH_SIZE, "batch of {}", uris.len());

        let throttled = self.throttled_calls.lock().unwrap().remove(&call)
            || uris.iter().any(|u| self.poisoned.lock().unwrap().contains(u));
        if throttled {
            return Err(SkyError::RateLimited {
                retry_after: Duration::from_millis(1),
            });
        }

        Ok(uris
            .iter()
            .filter(|u| !self.missing.contains(*u))
            .map(|uri| {
                let c = expected_counts(uri);
                PostView {
                    uri: uri.clone(),
                    cid: Some("bafy".into()),
                    like_count: (!self.omit_likes_reposts).then_some(c.likes),
                    repost_count: (!self.omit_likes_reposts).then_some(c.reposts),
                    reply_count: (!self.omit_replies).then_some(c.replies),
                }
            })
            .collect())
    }

    async fn get_like_count(&self, uri: &str) -> SkyResult<u64> {
        self.like_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(expected_counts(uri).likes)
    }

    async fn get_repost_count(&self, uri: &str) -> SkyResult<u64> {
        Ok(expected_counts(uri).reposts)
    }

    async fn get_reply_count(&self, uri: &str) -> SkyResult<u64> {
        self.reply_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(expected_counts(uri).replies)
    }
}

impl MockApi {
    fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes = self.batch_sizes.lock().unwrap().clone();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn posts(n: usize, age_days: i64) -> Vec<ContentItem> {
    (0..n)
        .map(|i| {
            ContentItemBuilder::new(
                ContentType::Post,
                format!("at://did:plc:erin/app.bsky.feed.post/{i}"),
            )
            .created_at(NOW - age_days * SECS_PER_DAY)
            .author_id("did:plc:erin")
            .build()
        })
        .collect()
}

fn fast_settings() -> HydrationSettings {
    HydrationSettings {
        backoff: Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            max_retries: 3,
        },
        call_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn hydrator(api: &Arc<MockApi>, settings: HydrationSettings) -> Hydrator {
    let api: Arc<dyn RemoteApi> = api.clone();
    Hydrator::new(api, settings)
}

// ==================== Batching ====================

#[tokio::test]
async fn test_150_items_make_two_batches() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(150, 3);

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(api.batch_sizes(), vec![100, 50]);
    assert_eq!(report.batches_issued, 2);
    assert_eq!(report.fetched_count, 150);
    assert_eq!(report.cached_count, 0);
    assert!(report.is_complete());
    for item in &items {
        assert_eq!(item.counts(), expected_counts(&item.uri));
    }
}

#[tokio::test]
async fn test_batch_ceiling_never_exceeded() {
    for n in [1usize, 99, 100, 101, 250] {
        let api = Arc::new(MockApi::default());
        let cache = EngagementCache::open_in_memory().unwrap();
        let mut items = posts(n, 3);
        let settings = HydrationSettings {
            batch_size: 10_000,
            ..fast_settings()
        };

        hydrator(&api, settings)
            .hydrate_at(&mut items, &cache, None, NOW)
            .await
            .unwrap();

        let sizes = api.batch_sizes();
        assert!(sizes.iter().all(|&s| s <= MAX_BATCH_SIZE), "n = {n}: {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), n);
        assert_eq!(sizes.len(), n.div_ceil(MAX_BATCH_SIZE));
    }
}

#[tokio::test]
async fn test_only_posts_are_hydrated() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(3, 1);
    items.push(
        ContentItemBuilder::new(ContentType::Like, "at://did:plc:erin/app.bsky.feed.like/77")
            .created_at(NOW)
            .subject_uri("at://did:plc:x/app.bsky.feed.post/1")
            .build(),
    );

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.not_applicable, 1);
    assert_eq!(report.fetched_count, 3);
    assert_eq!(api.batch_sizes(), vec![3]);
    assert_eq!(items[3].counts(), EngagementCounts::default());
}

// ==================== Cache interplay ====================

#[tokio::test]
async fn test_second_pass_hits_cache_only() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut first = posts(120, 3);

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut first, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(report.fetched_count, 120);
    let calls_after_first = api.calls();
    assert_eq!(calls_after_first, 2);

    let mut second = posts(120, 3);
    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut second, &cache, None, NOW + 60)
        .await
        .unwrap();
    assert_eq!(api.calls(), calls_after_first);
    assert_eq!(report.batches_issued, 0);
    assert_eq!(report.cached_count, 120);
    assert_eq!(report.fetched_count, 0);

    let a: Vec<EngagementCounts> = first.iter().map(ContentItem::counts).collect();
    let b: Vec<EngagementCounts> = second.iter().map(ContentItem::counts).collect();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_expired_entries_are_refetched() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(10, 2);

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    // two-day-old posts get a one hour ttl
    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW + 3_600)
        .await
        .unwrap();
    assert_eq!(report.fetched_count, 10);
    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn test_ttl_assigned_from_age() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(1, 40);
    items.extend(posts(2, 2).into_iter().skip(1));

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    let old = cache.get_at(&items[0].uri, NOW).unwrap().unwrap();
    let recent = cache.get_at(&items[1].uri, NOW).unwrap().unwrap();
    assert_eq!(old.ttl_seconds, 24 * 3_600);
    assert_eq!(recent.ttl_seconds, 3_600);
    assert_eq!(old.ttl_seconds, ttl_for_age(40 * SECS_PER_DAY));
}

// ==================== Failures ====================

#[tokio::test]
async fn test_rate_limited_batch_retries_and_succeeds() {
    let api = Arc::new(MockApi::default());
    api.throttled_calls.lock().unwrap().extend([0, 1]);
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(150, 3);

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert!(report.retries >= 2);
    assert_eq!(report.batches_failed, 0);
    assert_eq!(report.fetched_count, 150);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_exhausted_batch_left_unhydrated_others_apply() {
    let api = Arc::new(MockApi::default());
    // uri 120 lands in the second batch
    api.poisoned
        .lock()
        .unwrap()
        .insert("at://did:plc:erin/app.bsky.feed.post/120".to_string());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(150, 3);
    let before: Vec<EngagementCounts> = items.iter().map(ContentItem::counts).collect();

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(report.batches_issued, 2);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.fetched_count, 100);
    assert_eq!(report.unhydrated, 50);
    assert!(report.summary_line().contains("50 unhydrated"));
    for (i, item) in items.iter().enumerate() {
        if i < 100 {
            assert_eq!(item.counts(), expected_counts(&item.uri));
        } else {
            assert_eq!(item.counts(), before[i]);
        }
    }
    // 1 first attempt + 3 retries for the failing batch, 1 for the good one
    assert_eq!(api.calls(), 5);
}

#[tokio::test]
async fn test_all_batches_failing_is_fatal() {
    let api = Arc::new(MockApi::default());
    {
        let mut poisoned = api.poisoned.lock().unwrap();
        poisoned.insert("at://did:plc:erin/app.bsky.feed.post/0".to_string());
        poisoned.insert("at://did:plc:erin/app.bsky.feed.post/100".to_string());
    }
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(150, 3);

    let err = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap_err();
    match err {
        SkyError::HydrationFailed {
            attempted,
            unhydrated,
        } => {
            assert_eq!(attempted, 2);
            assert_eq!(unhydrated, 150);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_posts_are_reported() {
    let api = Arc::new(MockApi {
        missing: ["at://did:plc:erin/app.bsky.feed.post/3".to_string()]
            .into_iter()
            .collect(),
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(5, 3);

    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(report.not_found, 1);
    assert_eq!(report.fetched_count, 4);
    assert_eq!(report.unhydrated, 1);
    assert!(cache.get_at(&items[3].uri, NOW).unwrap().is_none());
}

#[tokio::test]
async fn test_cache_write_failure_keeps_fetched_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engagement.db");
    let cache = EngagementCache::open(&path).unwrap();
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_writes BEFORE INSERT ON engagement
             BEGIN SELECT RAISE(ABORT, 'writes rejected'); END;",
        )
        .unwrap();

    let api = Arc::new(MockApi::default());
    let mut items = posts(150, 3);
    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(report.fetched_count, 150);
    assert_eq!(report.cache_write_failures, 2);
    assert!(report.is_complete());
    for item in &items {
        assert_eq!(item.counts(), expected_counts(&item.uri));
    }
    let uris: Vec<String> = items.iter().map(|i| i.uri.clone()).collect();
    assert!(cache.get_batch_at(&uris, NOW).unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_read_failure_treats_posts_as_misses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engagement.db");
    let cache = EngagementCache::open(&path).unwrap();
    let api = Arc::new(MockApi::default());
    let mut items = posts(30, 3);

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(api.calls(), 1);

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE engagement;")
        .unwrap();
    assert!(cache.get_batch_at(&[items[0].uri.clone()], NOW).is_err());

    let mut again = posts(30, 3);
    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut again, &cache, None, NOW + 60)
        .await
        .unwrap();
    assert_eq!(report.cached_count, 0);
    assert_eq!(report.fetched_count, 30);
    assert_eq!(report.cache_write_failures, 1);
    assert_eq!(api.calls(), 2);
    for item in &again {
        assert_eq!(item.counts(), expected_counts(&item.uri));
    }
}

// ==================== Replies and fill-ins ====================

#[tokio::test]
async fn test_reply_lookups_respect_cutoff() {
    let api = Arc::new(MockApi {
        omit_replies: true,
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(4, 2);
    items.extend(posts(9, 40).into_iter().skip(4).map(|mut item| {
        item.reply_count = 9;
        item
    }));

    let settings = HydrationSettings {
        reply_strategy: ReplyStrategy::Thread { cutoff_days: 30 },
        ..fast_settings()
    };
    let report = hydrator(&api, settings)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(report.reply_lookups, 4);
    assert_eq!(api.reply_lookups.load(Ordering::SeqCst), 4);
    for item in &items[..4] {
        assert_eq!(item.reply_count, expected_counts(&item.uri).replies);
    }
    for item in &items[4..] {
        assert_eq!(item.reply_count, 9);
        assert_eq!(item.like_count, expected_counts(&item.uri).likes);
        let entry = cache.get_at(&item.uri, NOW).unwrap().unwrap();
        assert_eq!(entry.reply_count, None);
    }
}

#[tokio::test]
async fn test_skipped_replies_do_not_shadow_later_lookups() {
    let api = Arc::new(MockApi {
        omit_replies: true,
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items: Vec<ContentItem> = posts(6, 1).into_iter().skip(5).collect();
    items[0].reply_count = 9;
    let uri = items[0].uri.clone();

    let skip = HydrationSettings {
        reply_strategy: ReplyStrategy::Skip,
        ..fast_settings()
    };
    hydrator(&api, skip)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(items[0].reply_count, 9);
    assert_eq!(items[0].like_count, expected_counts(&uri).likes);
    assert_eq!(cache.get_at(&uri, NOW).unwrap().unwrap().reply_count, None);

    // a thread pass within the entry's ttl still looks replies up
    let thread = HydrationSettings {
        reply_strategy: ReplyStrategy::Thread { cutoff_days: 0 },
        ..fast_settings()
    };
    let report = hydrator(&api, thread)
        .hydrate_at(&mut items, &cache, None, NOW + 60)
        .await
        .unwrap();
    assert_eq!(report.cached_count, 0);
    assert_eq!(report.reply_lookups, 1);
    assert_eq!(items[0].reply_count, expected_counts(&uri).replies);
    assert_eq!(
        cache.get_at(&uri, NOW + 60).unwrap().unwrap().reply_count,
        Some(expected_counts(&uri).replies)
    );

    // and a later skip pass is served from that complete entry
    let calls = api.calls();
    let report = hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW + 120)
        .await
        .unwrap();
    assert_eq!(report.cached_count, 1);
    assert_eq!(api.calls(), calls);
}

#[tokio::test]
async fn test_skip_strategy_makes_no_reply_calls() {
    let api = Arc::new(MockApi {
        omit_replies: true,
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(20, 1);

    let settings = HydrationSettings {
        reply_strategy: ReplyStrategy::Skip,
        ..fast_settings()
    };
    let report = hydrator(&api, settings)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(report.reply_lookups, 0);
    assert_eq!(api.reply_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_like_counts_are_filled_in() {
    let api = Arc::new(MockApi {
        omit_likes_reposts: true,
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(6, 1);

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();
    assert_eq!(api.like_lookups.load(Ordering::SeqCst), 6);
    for item in &items {
        assert_eq!(item.counts(), expected_counts(&item.uri));
    }
}

// ==================== Concurrency, progress, stopping ====================

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let api = Arc::new(MockApi {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(1_000, 3);

    let settings = HydrationSettings {
        max_concurrency: 3,
        ..fast_settings()
    };
    hydrator(&api, settings)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert_eq!(api.calls(), 10);
    assert!(api.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_progress_reaches_total() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(250, 3);
    let seen: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, Some(&progress), NOW)
        .await
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(seen.last(), Some(&(250, 250)));
}

#[tokio::test]
async fn test_cancellation_stops_dispatch() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(300, 3);
    let cancel = Arc::new(AtomicBool::new(true));

    let report = hydrator(&api, fast_settings())
        .with_cancel_flag(cancel)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.batches_issued, 0);
    assert_eq!(report.unhydrated, 300);
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn test_time_budget_returns_partial_results() {
    let api = Arc::new(MockApi {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(500, 3);

    let settings = HydrationSettings {
        max_concurrency: 1,
        time_budget: Some(Duration::from_millis(10)),
        ..fast_settings()
    };
    let report = hydrator(&api, settings)
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.batches_issued, 1);
    assert_eq!(report.fetched_count, 100);
    assert_eq!(report.unhydrated, 400);
}

#[tokio::test]
async fn test_cache_counts_keyed_by_uri() {
    let api = Arc::new(MockApi::default());
    let cache = EngagementCache::open_in_memory().unwrap();
    let mut items = posts(30, 3);

    hydrator(&api, fast_settings())
        .hydrate_at(&mut items, &cache, None, NOW)
        .await
        .unwrap();

    let uris: Vec<String> = items.iter().map(|i| i.uri.clone()).collect();
    let cached: HashMap<_, _> = cache.get_batch_at(&uris, NOW).unwrap();
    assert_eq!(cached.len(), 30);
    for item in &items {
        assert_eq!(cached[&item.uri].counts(), item.counts());
    }
}
