//! CLI command implementations.

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::archive::RepoBuilder;
use crate::cache::EngagementCache;
use crate::collection::{ContentCollection, SearchParams};
use crate::config::Settings;
use crate::fetch::{RemoteApi, XrpcClient};
use crate::hydrate::ReplyStrategy;
use crate::pipeline::{self, LoadSource, Loaded};
use crate::types::{ContentItem, ContentType, SkyError, SkyResult};

/// Record dump accepted by `skyv pack`.
#[derive(Debug, Deserialize)]
pub struct RecordDump {
    pub did: String,
    #[serde(default = "default_true")]
    pub commit: bool,
    pub records: Vec<DumpedRecord>,
}

#[derive(Debug, Deserialize)]
pub struct DumpedRecord {
    pub collection: String,
    pub rkey: String,
    pub value: Value,
}

fn default_true() -> bool {
    true
}

fn runtime() -> SkyResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn client(settings: &Settings) -> SkyResult<Arc<dyn RemoteApi>> {
    let client = XrpcClient::new(settings.client_config())?.with_pacer(settings.pacer());
    Ok(Arc::new(client))
}

fn print_json(value: &impl serde::Serialize) -> SkyResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_export(collection: &ContentCollection, out: &Path) -> SkyResult<()> {
    std::fs::write(out, collection.export_json()?)?;
    Ok(())
}

fn print_load(loaded: &Loaded) {
    match &loaded.source {
        LoadSource::Archive(summary) => {
            println!(
                "Owner: {}",
                summary.owner.as_deref().unwrap_or("(unknown)")
            );
            println!(
                "Blocks: {} read, {} decoded, {} skipped, {} ignored",
                summary.blocks_read,
                summary.blocks_decoded,
                summary.blocks_skipped,
                summary.blocks_ignored
            );
            if !summary.commit_found {
                println!("Commit: missing");
            }
            for (codec, count) in &summary.codecs {
                println!("  {}: {}", codec, count);
            }
        }
        LoadSource::Remote(summary) => {
            println!(
                "Pages: {} ({} retries), records: {}",
                summary.pages, summary.retries, summary.records
            );
            for collection in &summary.truncated {
                println!("  {} stopped at the page limit", collection);
            }
        }
    }
    let stats = loaded.collection.stats();
    println!(
        "Items: {} ({} posts, {} likes, {} reposts)",
        stats.total, stats.posts, stats.likes, stats.reposts
    );
    if loaded.normalize.dropped > 0 {
        println!("Dropped: {} malformed records", loaded.normalize.dropped);
    }
}

/// Decode an archive and report what it holds.
pub fn cmd_decode(path: &Path, did: Option<&str>, json: bool) -> SkyResult<()> {
    let loaded = pipeline::load_archive(path, did)?;
    if json {
        print_json(&serde_json::json!({
            "file": path.display().to_string(),
            "load": loaded.source,
            "normalize": loaded.normalize,
            "stats": loaded.collection.stats(),
        }))
    } else {
        println!("File: {}", path.display());
        print_load(&loaded);
        Ok(())
    }
}

/// Page through the remote API for `did`.
pub fn cmd_fetch(settings: &Settings, did: &str, out: Option<&Path>, json: bool) -> SkyResult<()> {
    let api = client(settings)?;
    let loaded = runtime()?.block_on(pipeline::load_remote(api.as_ref(), did, settings))?;

    if let Some(out) = out {
        write_export(&loaded.collection, out)?;
    }
    if json {
        print_json(&serde_json::json!({
            "did": did,
            "load": loaded.source,
            "normalize": loaded.normalize,
            "stats": loaded.collection.stats(),
        }))
    } else {
        print_load(&loaded);
        if let Some(out) = out {
            println!("Wrote {}", out.display());
        }
        Ok(())
    }
}

/// Decode an archive and hydrate its posts.
pub fn cmd_hydrate(
    settings: &Settings,
    path: &Path,
    did: Option<&str>,
    out: Option<&Path>,
    no_replies: bool,
    json: bool,
) -> SkyResult<()> {
    let settings = if no_replies {
        with_reply_strategy(settings, ReplyStrategy::Skip)
    } else {
        settings.clone()
    };
    let mut loaded = pipeline::load_archive(path, did)?;
    let cache = EngagementCache::open(&settings.cache_path())?;
    let api = client(&settings)?;

    let show_progress = !json && std::io::stderr().is_terminal();
    let progress = move |done: usize, total: usize| {
        if show_progress {
            eprint!("\rHydrating: {}/{}", done, total);
            let _ = std::io::stderr().flush();
        }
    };

    let report = runtime()?.block_on(pipeline::hydrate_collection(
        &mut loaded.collection,
        api,
        &cache,
        &settings,
        None,
        Some(&progress),
    ))?;
    if show_progress {
        eprintln!();
    }

    if let Some(out) = out {
        write_export(&loaded.collection, out)?;
    }
    if json {
        print_json(&serde_json::json!({
            "file": path.display().to_string(),
            "hydration": report,
            "stats": loaded.collection.stats(),
        }))
    } else {
        println!("{}", report.summary_line());
        if report.reply_lookups > 0 {
            println!("Reply lookups: {}", report.reply_lookups);
        }
        if report.cache_write_failures > 0 {
            println!(
                "Cache writes failed for {} batches; counts still applied",
                report.cache_write_failures
            );
        }
        if let Some(out) = out {
            println!("Wrote {}", out.display());
        }
        Ok(())
    }
}

/// Load items for searching: an exported JSON file as-is, or an archive
/// with counts taken from fresh cache entries only.
fn load_for_search(settings: &Settings, path: &Path, did: Option<&str>) -> SkyResult<ContentCollection> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let text = std::fs::read_to_string(path)?;
        let items: Vec<ContentItem> = serde_json::from_str(&text)?;
        return Ok(ContentCollection::new(items));
    }

    let mut collection = pipeline::load_archive(path, did)?.collection;
    let cache_path = settings.cache_path();
    if cache_path.exists() {
        let cache = EngagementCache::open(&cache_path)?;
        let uris: Vec<String> = collection
            .items()
            .iter()
            .filter(|item| item.content_type == ContentType::Post)
            .map(|item| item.uri.clone())
            .collect();
        let cached = cache.get_batch(&uris)?;
        for item in collection.items_mut() {
            if let Some(entry) = cached.get(&item.uri) {
                entry.apply_to(item);
            }
        }
    }
    Ok(collection)
}

/// Filter and sort the items of an archive or export.
pub fn cmd_search(
    settings: &Settings,
    path: &Path,
    did: Option<&str>,
    params: SearchParams,
    json: bool,
) -> SkyResult<()> {
    let collection = load_for_search(settings, path, did)?;
    let results = collection.search(&params);

    if json {
        let items: Vec<Value> = results
            .iter()
            .map(|item| {
                serde_json::json!({
                    "uri": item.uri,
                    "type": item.content_type.name(),
                    "created_at": item.created_at,
                    "text": item.text,
                    "likes": item.like_count,
                    "reposts": item.repost_count,
                    "replies": item.reply_count,
                    "engagement_score": item.engagement_score(),
                })
            })
            .collect();
        print_json(&items)
    } else {
        for item in &results {
            println!(
                "{} [{}] {} (score {:.1}): {:?}",
                format_timestamp(item.created_at),
                item.content_type.name(),
                item.uri,
                item.engagement_score(),
                item.text
            );
        }
        println!("\n{} results", results.len());
        Ok(())
    }
}

/// Build an archive from a JSON record dump.
pub fn cmd_pack(input: &Path, output: &Path, json: bool) -> SkyResult<()> {
    let text = std::fs::read_to_string(input)?;
    let dump: RecordDump = serde_json::from_str(&text)?;
    if dump.did.is_empty() {
        return Err(SkyError::Config("record dump has an empty did".into()));
    }

    let count = dump.records.len();
    let mut builder = RepoBuilder::new(dump.did.clone());
    if !dump.commit {
        builder = builder.without_commit();
    }
    for record in dump.records {
        builder = builder.record(&record.collection, &record.rkey, record.value);
    }
    builder.write_to_file(output)?;

    if json {
        print_json(&serde_json::json!({
            "file": output.display().to_string(),
            "did": dump.did,
            "records": count,
        }))
    } else {
        println!("Packed {} records into {}", count, output.display());
        Ok(())
    }
}

/// Show cache entry counts.
pub fn cmd_cache_stats(settings: &Settings, json: bool) -> SkyResult<()> {
    let path = settings.cache_path();
    let cache = EngagementCache::open(&path)?;
    let stats = cache.stats()?;
    if json {
        print_json(&serde_json::json!({
            "file": path.display().to_string(),
            "total": stats.total,
            "fresh": stats.fresh,
            "expired": stats.expired,
        }))
    } else {
        println!("Cache: {}", path.display());
        println!("Entries: {}", stats.total);
        println!("  Fresh: {}", stats.fresh);
        println!("  Expired: {}", stats.expired);
        Ok(())
    }
}

/// Delete expired cache entries.
pub fn cmd_cache_clear_expired(settings: &Settings, json: bool) -> SkyResult<()> {
    let cache = EngagementCache::open(&settings.cache_path())?;
    let removed = cache.clear_expired()?;
    if json {
        print_json(&serde_json::json!({ "removed": removed }))
    } else {
        println!("Removed {} expired entries", removed);
        Ok(())
    }
}

fn with_reply_strategy(settings: &Settings, strategy: ReplyStrategy) -> Settings {
    let mut settings = settings.clone();
    match strategy {
        ReplyStrategy::Bulk => settings.hydration.reply_strategy = "bulk".to_string(),
        ReplyStrategy::Skip => settings.hydration.reply_strategy = "skip".to_string(),
        ReplyStrategy::Thread { cutoff_days } => {
            settings.hydration.reply_strategy = "thread".to_string();
            settings.hydration.reply_cutoff_days = cutoff_days;
        }
    }
    settings
}

fn format_timestamp(secs: i64) -> String {
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => format!("{} s", secs),
    }
}
