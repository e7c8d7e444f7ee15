//! End-to-end entry points: load a collection, then hydrate it.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;

use crate::archive::{ArchiveReader, DecodeSummary};
use crate::cache::EngagementCache;
use crate::collection::ContentCollection;
use crate::config::Settings;
use crate::fetch::{fetch_all_collections, FetchSummary, RemoteApi};
use crate::hydrate::{HydrationReport, Hydrator, ProgressFn};
use crate::normalize::{normalize_all, NormalizeReport};
use crate::types::SkyResult;

/// Where a collection came from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "source")]
pub enum LoadSource {
    Archive(DecodeSummary),
    Remote(FetchSummary),
}

/// A freshly loaded, not yet hydrated collection.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub collection: ContentCollection,
    pub source: LoadSource,
    pub normalize: NormalizeReport,
}

/// Decode an archive file and normalize its records.
pub fn load_archive(path: &Path, owner_hint: Option<&str>) -> SkyResult<Loaded> {
    let mut reader = ArchiveReader::new();
    if let Some(did) = owner_hint {
        reader = reader.owner_hint(did);
    }
    let decoded = reader.read_from_file(path)?;
    let (items, normalize) = normalize_all(&decoded.records);
    log::info!(
        "loaded {} items from {} ({} records dropped)",
        items.len(),
        path.display(),
        normalize.dropped
    );
    Ok(Loaded {
        collection: ContentCollection::new(items),
        source: LoadSource::Archive(decoded.summary),
        normalize,
    })
}

/// Page through the remote API and normalize the records.
pub async fn load_remote(
    api: &dyn RemoteApi,
    owner: &str,
    settings: &Settings,
) -> SkyResult<Loaded> {
    let (records, summary) = fetch_all_collections(api, owner, &settings.fetch_options()).await?;
    let (items, normalize) = normalize_all(&records);
    log::info!(
        "fetched {} items for {} ({} records dropped)",
        items.len(),
        owner,
        normalize.dropped
    );
    Ok(Loaded {
        collection: ContentCollection::new(items),
        source: LoadSource::Remote(summary),
        normalize,
    })
}

/// Hydrate every post in `collection` with the configured settings.
pub async fn hydrate_collection(
    collection: &mut ContentCollection,
    api: Arc<dyn RemoteApi>,
    cache: &EngagementCache,
    settings: &Settings,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressFn<'_>>,
) -> SkyResult<HydrationReport> {
    let mut hydrator = Hydrator::new(api, settings.hydration_settings()?);
    if let Some(flag) = cancel {
        hydrator = hydrator.with_cancel_flag(flag);
    }
    hydrator
        .hydrate(collection.items_mut(), cache, progress)
        .await
}
