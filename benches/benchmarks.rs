//! Criterion benchmarks for Skyvault.

use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use serde_json::json;
use tempfile::{tempdir, NamedTempFile};

use skyvault::archive::{ArchiveReader, RepoBuilder};
use skyvault::cache::{CacheEntry, EngagementCache};
use skyvault::collection::{ContentCollection, SearchParams, SearchSort};
use skyvault::normalize::normalize_all;
use skyvault::types::{EngagementCounts, LIKE_COLLECTION, POST_COLLECTION};

const DID: &str = "did:plc:bench";

/// Build an archive with `posts` posts and `likes` likes of random shape.
fn make_archive(posts: usize, likes: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut builder = RepoBuilder::new(DID);
    for i in 0..posts {
        let words = rng.gen_range(3..40);
        let text: Vec<String> = (0..words).map(|w| format!("word{}", (w * 7 + i) % 500)).collect();
        builder = builder.record(
            POST_COLLECTION,
            &format!("3kpost{i:08}"),
            json!({
                "$type": POST_COLLECTION,
                "text": text.join(" "),
                "createdAt": format!("2024-{:02}-{:02}T12:00:00Z", rng.gen_range(1..13), rng.gen_range(1..29)),
                "langs": ["en"],
            }),
        );
    }
    for i in 0..likes {
        builder = builder.record(
            LIKE_COLLECTION,
            &format!("3klike{i:08}"),
            json!({
                "$type": LIKE_COLLECTION,
                "subject": {"uri": format!("at://did:plc:other/app.bsky.feed.post/{}", rng.gen_range(0..100_000)), "cid": "bafyx"},
                "createdAt": "2024-06-01T00:00:00Z",
            }),
        );
    }
    builder.build().unwrap()
}

fn bench_decode_10k(c: &mut Criterion) {
    let bytes = make_archive(5_000, 5_000);
    let reader = ArchiveReader::new();

    c.bench_function("decode_10k_records", |b| {
        b.iter(|| {
            let decoded = reader.decode(&bytes).unwrap();
            assert_eq!(decoded.records.len(), 10_000);
        })
    });
}

fn bench_decode_file_mmap(c: &mut Criterion) {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), make_archive(10_000, 0)).unwrap();
    let reader = ArchiveReader::new();

    c.bench_function("decode_10k_posts_from_file", |b| {
        b.iter(|| reader.read_from_file(tmp.path()).unwrap())
    });
}

fn bench_normalize_10k(c: &mut Criterion) {
    let decoded = ArchiveReader::new()
        .decode(&make_archive(5_000, 5_000))
        .unwrap();

    c.bench_function("normalize_10k", |b| {
        b.iter(|| normalize_all(&decoded.records))
    });
}

fn bench_cache_get_batch(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let cache = EngagementCache::open(&dir.path().join("bench.db")).unwrap();
    let mut rng = rand::thread_rng();
    let now = skyvault::now_secs();

    let entries: Vec<CacheEntry> = (0..50_000)
        .map(|i| {
            CacheEntry::new(
                format!("at://{DID}/{POST_COLLECTION}/{i}"),
                EngagementCounts::new(rng.gen_range(0..1_000), rng.gen_range(0..100), rng.gen_range(0..50)),
                now,
                86_400,
            )
        })
        .collect();
    cache.put_entries(&entries).unwrap();

    let uris: Vec<String> = (0..1_000)
        .map(|_| format!("at://{DID}/{POST_COLLECTION}/{}", rng.gen_range(0..60_000)))
        .collect();

    c.bench_function("cache_get_batch_1k_of_50k", |b| {
        b.iter(|| cache.get_batch(&uris).unwrap())
    });
}

fn bench_cache_put_batch(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let cache = EngagementCache::open(&dir.path().join("bench.db")).unwrap();
    let batch: Vec<(String, EngagementCounts)> = (0..100)
        .map(|i| (format!("at://{DID}/{POST_COLLECTION}/{i}"), EngagementCounts::new(i, 0, 0)))
        .collect();

    c.bench_function("cache_set_batch_100", |b| {
        b.iter(|| cache.set_batch(&batch, 3_600).unwrap())
    });
}

fn bench_search_top_engagement(c: &mut Criterion) {
    let decoded = ArchiveReader::new()
        .decode(&make_archive(20_000, 0))
        .unwrap();
    let (mut items, _) = normalize_all(&decoded.records);
    let mut rng = rand::thread_rng();
    for item in &mut items {
        item.apply_counts(EngagementCounts::new(
            rng.gen_range(0..500),
            rng.gen_range(0..50),
            rng.gen_range(0..20),
        ));
    }
    let collection = ContentCollection::new(items);
    let params = SearchParams {
        text_contains: Some("word42".into()),
        sort: SearchSort::TopEngagement,
        limit: 50,
        ..Default::default()
    };

    c.bench_function("search_20k_top_engagement", |b| {
        b.iter(|| collection.search(&params).len())
    });
}

criterion_group!(
    benches,
    bench_decode_10k,
    bench_decode_file_mmap,
    bench_normalize_10k,
    bench_cache_get_batch,
    bench_cache_put_batch,
    bench_search_top_engagement,
);
criterion_main!(benches);
