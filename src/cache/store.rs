//! SQLite-backed engagement store.
//!
//! One table keyed by uri. A stale entry is indistinguishable from a missing
//! one to callers. Writes go through a single writer connection; reads take
//! a connection from a small read-only pool, so concurrent readers neither
//! wait on each other nor on a pending write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use serde::Serialize;

use crate::types::error::{SkyError, SkyResult};
use crate::types::{now_secs, ContentItem, EngagementCounts};

/// Uris per `IN (...)` lookup, well under SQLite's parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Read-only connections kept open per cache file.
const READER_POOL_SIZE: u32 = 4;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS engagement (
    uri             TEXT PRIMARY KEY NOT NULL,
    like_count      INTEGER NOT NULL DEFAULT 0,
    repost_count    INTEGER NOT NULL DEFAULT 0,
    reply_count     INTEGER,
    last_updated_at INTEGER NOT NULL,
    ttl_seconds     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_engagement_expiry
    ON engagement (last_updated_at, ttl_seconds);
";

/// Last known engagement counts for one uri.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub uri: String,
    pub like_count: u64,
    pub repost_count: u64,
    /// `None` when the pass that wrote the entry did not look replies up.
    pub reply_count: Option<u64>,
    /// When the counts were fetched (epoch seconds).
    pub last_updated_at: i64,
    /// Lifetime assigned at write time.
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Build an entry from counts.
    pub fn new(uri: impl Into<String>, counts: EngagementCounts, now: i64, ttl_seconds: u64) -> Self {
        Self {
            uri: uri.into(),
            like_count: counts.likes,
            repost_count: counts.reposts,
            reply_count: Some(counts.replies),
            last_updated_at: now,
            ttl_seconds,
        }
    }

    /// Forget the reply count, for passes that did not look it up.
    pub fn without_replies(mut self) -> Self {
        self.reply_count = None;
        self
    }

    /// The stored counts. An unknown reply count reads as zero.
    pub fn counts(&self) -> EngagementCounts {
        EngagementCounts::new(
            self.like_count,
            self.repost_count,
            self.reply_count.unwrap_or(0),
        )
    }

    /// Copy the stored counts onto `item`, keeping its reply count when the
    /// entry has none.
    pub fn apply_to(&self, item: &mut ContentItem) {
        item.like_count = self.like_count;
        item.repost_count = self.repost_count;
        if let Some(replies) = self.reply_count {
            item.reply_count = replies;
        }
    }

    /// Fresh iff `now - last_updated_at < ttl_seconds`.
    pub fn is_fresh_at(&self, now: i64) -> bool {
        now.saturating_sub(self.last_updated_at) < self.ttl_seconds as i64
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uri: row.get(0)?,
            like_count: row.get::<_, i64>(1)? as u64,
            repost_count: row.get::<_, i64>(2)? as u64,
            reply_count: row.get::<_, Option<i64>>(3)?.map(|n| n as u64),
            last_updated_at: row.get(4)?,
            ttl_seconds: row.get::<_, i64>(5)? as u64,
        })
    }
}

/// Entry counts by freshness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: u64,
    pub fresh: u64,
    pub expired: u64,
}

/// Where reads are served from.
enum Readers {
    Pool(Pool<SqliteConnectionManager>),
    /// In-memory databases are private to one connection.
    Writer,
}

/// Durable engagement cache.
pub struct EngagementCache {
    writer: Mutex<Connection>,
    readers: Readers,
    path: Option<PathBuf>,
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_err(e: rusqlite::Error) -> SkyError {
    SkyError::CacheWrite(e.to_string())
}

impl EngagementCache {
    /// Open or create the cache file. A corrupt file is discarded and
    /// rebuilt empty; its contents are always recoverable by re-hydrating.
    pub fn open(path: &Path) -> SkyResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = match open_checked(path) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!(
                    "engagement cache at {} is unusable ({e}), rebuilding",
                    path.display()
                );
                remove_database_files(path)?;
                open_checked(path)?
            }
        };
        let manager = SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(READER_POOL_SIZE)
            .min_idle(Some(1))
            .build(manager)?;

        log::debug!("opened engagement cache at {}", path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Readers::Pool(pool),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a process-local cache (for testing). Reads share the writer connection.
    pub fn open_in_memory() -> SkyResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            writer: Mutex::new(conn),
            readers: Readers::Writer,
            path: None,
        })
    }

    /// Run `read` on a reader connection.
    fn with_reader<T>(&self, read: impl FnOnce(&Connection) -> SkyResult<T>) -> SkyResult<T> {
        match &self.readers {
            Readers::Pool(pool) => {
                let conn = pool.get()?;
                read(&conn)
            }
            Readers::Writer => read(&lock(&self.writer)),
        }
    }

    /// Location of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fresh entry for `uri`, if any.
    pub fn get(&self, uri: &str) -> SkyResult<Option<CacheEntry>> {
        self.get_at(uri, now_secs())
    }

    /// Fresh entry for `uri` as of `now`.
    pub fn get_at(&self, uri: &str, now: i64) -> SkyResult<Option<CacheEntry>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT uri, like_count, repost_count, reply_count, last_updated_at, ttl_seconds
                 FROM engagement WHERE uri = ?1 AND ?2 - last_updated_at < ttl_seconds",
            )?;
            let mut rows = stmt.query(params![uri, now])?;
            let entry = match rows.next()? {
                Some(row) => Some(CacheEntry::from_row(row)?),
                None => None,
            };
            Ok(entry)
        })
    }

    /// Fresh entries for every uri that has one.
    pub fn get_batch(&self, uris: &[String]) -> SkyResult<HashMap<String, CacheEntry>> {
        self.get_batch_at(uris, now_secs())
    }

    /// Fresh entries as of `now`.
    pub fn get_batch_at(&self, uris: &[String], now: i64) -> SkyResult<HashMap<String, CacheEntry>> {
        self.with_reader(|conn| {
            let mut found = HashMap::with_capacity(uris.len());
            for chunk in uris.chunks(LOOKUP_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "SELECT uri, like_count, repost_count, reply_count, last_updated_at, ttl_seconds
                     FROM engagement WHERE uri IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let entries =
                    stmt.query_map(params_from_iter(chunk.iter()), CacheEntry::from_row)?;
                for entry in entries {
                    let entry = entry?;
                    if entry.is_fresh_at(now) {
                        found.insert(entry.uri.clone(), entry);
                    }
                }
            }
            Ok(found)
        })
    }

    /// Store counts for one uri, replacing any previous entry.
    pub fn set(&self, uri: &str, counts: EngagementCounts, ttl_seconds: u64) -> SkyResult<()> {
        self.put_entries(&[CacheEntry::new(uri, counts, now_secs(), ttl_seconds)])
    }

    /// Store counts for many uris with one ttl, in a single transaction.
    pub fn set_batch(&self, items: &[(String, EngagementCounts)], ttl_seconds: u64) -> SkyResult<()> {
        let now = now_secs();
        let entries: Vec<CacheEntry> = items
            .iter()
            .map(|(uri, counts)| CacheEntry::new(uri.clone(), *counts, now, ttl_seconds))
            .collect();
        self.put_entries(&entries)
    }

    /// Write fully-formed entries in a single transaction.
    pub fn put_entries(&self, entries: &[CacheEntry]) -> SkyResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = lock(&self.writer);
        let tx = conn.transaction().map_err(write_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO engagement
                     (uri, like_count, repost_count, reply_count, last_updated_at, ttl_seconds)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(write_err)?;
            for entry in entries {
                stmt.execute(params![
                    entry.uri,
                    entry.like_count as i64,
                    entry.repost_count as i64,
                    entry.reply_count.map(|n| n as i64),
                    entry.last_updated_at,
                    entry.ttl_seconds as i64,
                ])
                .map_err(write_err)?;
            }
        }
        tx.commit().map_err(write_err)
    }

    /// Delete every stale entry, returning how many were removed.
    pub fn clear_expired(&self) -> SkyResult<usize> {
        self.clear_expired_at(now_secs())
    }

    /// Delete entries stale as of `now`.
    pub fn clear_expired_at(&self, now: i64) -> SkyResult<usize> {
        let conn = lock(&self.writer);
        let removed = conn
            .execute(
                "DELETE FROM engagement WHERE ?1 - last_updated_at >= ttl_seconds",
                params![now],
            )
            .map_err(write_err)?;
        if removed > 0 {
            log::info!("removed {removed} expired cache entries");
        }
        Ok(removed)
    }

    /// Entry counts by freshness.
    pub fn stats(&self) -> SkyResult<CacheStats> {
        self.stats_at(now_secs())
    }

    /// Entry counts by freshness as of `now`.
    pub fn stats_at(&self, now: i64) -> SkyResult<CacheStats> {
        let (total, fresh): (i64, i64) = self.with_reader(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN ?1 - last_updated_at < ttl_seconds THEN 1 ELSE 0 END), 0)
                 FROM engagement",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })?;
        Ok(CacheStats {
            total: total as u64,
            fresh: fresh as u64,
            expired: (total - fresh) as u64,
        })
    }
}

/// Open a connection, verify integrity, enable WAL, and create the schema.
fn open_checked(path: &Path) -> SkyResult<Connection> {
    let conn = Connection::open(path)?;
    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(SkyError::CacheWrite(format!("integrity check failed: {check}")));
    }
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn remove_database_files(path: &Path) -> SkyResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_do_not_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EngagementCache::open(&dir.path().join("engagement.db")).unwrap();
        cache
            .set("at://did:plc:a/app.bsky.feed.post/1", EngagementCounts::new(1, 2, 3), 3_600)
            .unwrap();

        let Readers::Pool(pool) = &cache.readers else {
            panic!("file-backed cache should pool its readers");
        };
        // a held reader leaves others free for concurrent lookups
        let _held = pool.get().unwrap();
        let _second = pool.get().unwrap();
        let entry = cache.get("at://did:plc:a/app.bsky.feed.post/1").unwrap().unwrap();
        assert_eq!(entry.reply_count, Some(3));
    }

    #[test]
    fn test_unknown_replies_keep_item_count() {
        let cache = EngagementCache::open_in_memory().unwrap();
        let uri = "at://did:plc:a/app.bsky.feed.post/2";
        let entry =
            CacheEntry::new(uri, EngagementCounts::new(4, 5, 0), 1_000, 3_600).without_replies();
        cache.put_entries(&[entry]).unwrap();

        let stored = cache.get_at(uri, 1_001).unwrap().unwrap();
        assert_eq!(stored.reply_count, None);

        let mut item = crate::types::ContentItemBuilder::new(crate::types::ContentType::Post, uri)
            .counts(EngagementCounts::new(0, 0, 9))
            .build();
        stored.apply_to(&mut item);
        assert_eq!(item.counts(), EngagementCounts::new(4, 5, 9));
    }
}
