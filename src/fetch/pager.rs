//! Cursor pagination over the tracked collections.

use serde::Serialize;

use super::api::RemoteApi;
use super::backoff::Backoff;
use crate::types::{RawRecord, SkyError, SkyResult, MAX_BATCH_SIZE, TRACKED_COLLECTIONS};

/// Paging knobs.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Records per listing call, at most `MAX_BATCH_SIZE`.
    pub page_size: usize,
    /// Stop after this many pages per collection.
    pub max_pages: Option<usize>,
    /// Retry schedule for throttled or timed-out pages.
    pub backoff: Backoff,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_BATCH_SIZE,
            max_pages: None,
            backoff: Backoff::default(),
        }
    }
}

/// What a full fetch did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    pub pages: usize,
    pub records: usize,
    pub retries: usize,
    /// Listed records whose uri named a different collection.
    pub foreign: usize,
    /// Collections that stopped at `max_pages` with more pages remaining.
    pub truncated: Vec<String>,
}

/// Fetch one page of `collection`, returning its records and the next cursor.
pub async fn fetch_collection(
    api: &dyn RemoteApi,
    owner: &str,
    collection: &str,
    cursor: Option<&str>,
    page_size: usize,
) -> SkyResult<(Vec<RawRecord>, Option<String>)> {
    let limit = page_size.clamp(1, MAX_BATCH_SIZE);
    let page = api.list_records(owner, collection, cursor, limit).await?;

    let mut records = Vec::with_capacity(page.records.len());
    for listed in page.records {
        match listed.into_raw() {
            Ok(raw) => records.push(raw),
            Err(e) => log::warn!("skipping listed record: {}", e),
        }
    }
    Ok((records, page.cursor.filter(|c| !c.is_empty())))
}

/// Fetch every page of `collection`, retrying throttled pages with backoff.
pub async fn fetch_all(
    api: &dyn RemoteApi,
    owner: &str,
    collection: &str,
    options: &FetchOptions,
    summary: &mut FetchSummary,
) -> SkyResult<Vec<RawRecord>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if let Some(max) = options.max_pages {
            if pages >= max {
                log::info!("{}: stopped at {} pages", collection, max);
                summary.truncated.push(collection.to_string());
                break;
            }
        }

        let mut attempt = 0u32;
        let (records, next) = loop {
            match fetch_collection(api, owner, collection, cursor.as_deref(), options.page_size)
                .await
            {
                Ok(page) => break page,
                Err(e) if e.is_retryable() && options.backoff.can_retry(attempt) => {
                    let wait = options.backoff.delay(attempt, e.retry_after());
                    log::debug!("{} page {}: {}, retrying in {:?}", collection, pages, e, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    summary.retries += 1;
                }
                Err(e) => return Err(e),
            }
        };

        pages += 1;
        let listed = records.len();
        let before = all.len();
        all.extend(records.into_iter().filter(|r| r.collection == collection));
        summary.foreign += listed - (all.len() - before);

        match next {
            Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
            _ => break,
        }
    }

    summary.pages += pages;
    summary.records += all.len();
    log::info!("{}: {} records in {} pages", collection, all.len(), pages);
    Ok(all)
}

/// Fetch the three tracked collections for `owner`.
pub async fn fetch_all_collections(
    api: &dyn RemoteApi,
    owner: &str,
    options: &FetchOptions,
) -> SkyResult<(Vec<RawRecord>, FetchSummary)> {
    if owner.is_empty() {
        return Err(SkyError::Config("an account identifier is required".into()));
    }
    let mut summary = FetchSummary::default();
    let mut records = Vec::new();
    for collection in TRACKED_COLLECTIONS {
        records.extend(fetch_all(api, owner, collection, options, &mut summary).await?);
    }
    Ok((records, summary))
}
