//! One batch of remote engagement lookups, run inside a pool task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::{Backoff, PostView, RemoteApi};
use crate::types::{SkyError, SkyResult};

use super::settings::ReplyStrategy;

/// Work handed to a pool task: the uris of one batch with their creation
/// times (for the reply cutoff).
pub(crate) struct BatchJob {
    pub index: usize,
    pub posts: Vec<(String, i64)>,
}

/// Counts fetched for one post. `replies` is `None` when no reply count was
/// obtained, so the post keeps the one it had.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchedCounts {
    pub likes: u64,
    pub reposts: u64,
    pub replies: Option<u64>,
}

/// Shared, read-only parameters for every task of one hydration pass.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    /// Outer timeout per remote call; `None` when the api bounds its own requests.
    pub call_timeout: Option<Duration>,
    pub backoff: Backoff,
    pub reply_strategy: ReplyStrategy,
    pub now: i64,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl WorkerContext {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// What a task sends back to the orchestrator.
pub(crate) struct BatchResult {
    pub index: usize,
    pub size: usize,
    /// Counts per uri, or the error that exhausted the retry budget.
    pub outcome: SkyResult<Vec<(String, FetchedCounts)>>,
    /// Uris the bulk view did not return.
    pub not_found: usize,
    /// Uris whose secondary lookups failed.
    pub item_failures: usize,
    pub retries: usize,
    pub reply_lookups: usize,
}

/// Run `call` under the per-call timeout, retrying retryable failures with
/// backoff. Cancellation stops further retries.
async fn with_retry<T, F, Fut>(
    ctx: &WorkerContext,
    operation: &str,
    retries: &mut usize,
    mut call: F,
) -> SkyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SkyResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match ctx.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call()).await {
                Ok(result) => result,
                Err(_) => Err(SkyError::NetworkTimeout {
                    operation: operation.to_string(),
                }),
            },
            None => call().await,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && ctx.backoff.can_retry(attempt) && !ctx.cancelled() => {
                let wait = ctx.backoff.delay(attempt, e.retry_after());
                log::debug!("{}: {} (attempt {}), retrying in {:?}", operation, e, attempt + 1, wait);
                tokio::time::sleep(wait).await;
                attempt += 1;
                *retries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Hydrate one batch: a bulk lookup, then per-uri fill-ins for counts the
/// bulk view omitted.
pub(crate) async fn run_batch(
    api: Arc<dyn RemoteApi>,
    job: BatchJob,
    ctx: WorkerContext,
) -> BatchResult {
    let size = job.posts.len();
    let mut retries = 0usize;
    let uris: Vec<String> = job.posts.iter().map(|(uri, _)| uri.clone()).collect();

    log::debug!("batch {}: requesting {} uris", job.index, size);
    let bulk = with_retry(&ctx, "getPosts", &mut retries, || api.get_posts(&uris)).await;
    let views: HashMap<String, PostView> = match bulk {
        Ok(views) => views.into_iter().map(|v| (v.uri.clone(), v)).collect(),
        Err(e) => {
            return BatchResult {
                index: job.index,
                size,
                outcome: Err(e),
                not_found: 0,
                item_failures: 0,
                retries,
                reply_lookups: 0,
            }
        }
    };

    let mut counts = Vec::with_capacity(size);
    let mut not_found = 0usize;
    let mut item_failures = 0usize;
    let mut reply_lookups = 0usize;

    for (uri, created_at) in &job.posts {
        let Some(view) = views.get(uri) else {
            not_found += 1;
            continue;
        };
        match fill_counts(&api, &ctx, uri, *created_at, view, &mut retries, &mut reply_lookups)
            .await
        {
            Ok(c) => counts.push((uri.clone(), c)),
            Err(e) => {
                log::warn!("{}: engagement lookup failed: {}", uri, e);
                item_failures += 1;
            }
        }
    }

    BatchResult {
        index: job.index,
        size,
        outcome: Ok(counts),
        not_found,
        item_failures,
        retries,
        reply_lookups,
    }
}

async fn fill_counts(
    api: &Arc<dyn RemoteApi>,
    ctx: &WorkerContext,
    uri: &str,
    created_at: i64,
    view: &PostView,
    retries: &mut usize,
    reply_lookups: &mut usize,
) -> SkyResult<FetchedCounts> {
    let likes = match view.like_count {
        Some(n) => n,
        None => with_retry(ctx, "getLikes", retries, || api.get_like_count(uri)).await?,
    };
    let reposts = match view.repost_count {
        Some(n) => n,
        None => with_retry(ctx, "getRepostedBy", retries, || api.get_repost_count(uri)).await?,
    };
    let replies = match view.reply_count {
        Some(n) => Some(n),
        None if ctx.reply_strategy.wants_lookup(created_at, ctx.now) => {
            *reply_lookups += 1;
            Some(with_retry(ctx, "getPostThread", retries, || api.get_reply_count(uri)).await?)
        }
        None if ctx.reply_strategy == ReplyStrategy::Bulk => Some(0),
        None => None,
    };
    Ok(FetchedCounts {
        likes,
        reposts,
        replies,
    })
}
