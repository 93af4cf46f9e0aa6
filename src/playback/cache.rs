//! Local cache of finished artifacts keyed by source and settings.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::StoreError;
use crate::store::sha256_hex;
use crate::store::sqlite::{ensure_parent_dir, open_connection};

const CACHE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS video_cache (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    url_hash      TEXT NOT NULL,
    settings_hash TEXT NOT NULL,
    hash          TEXT NOT NULL,
    job_id        TEXT NOT NULL,
    UNIQUE (hash, url_hash, settings_hash)
);
CREATE INDEX IF NOT EXISTS idx_video_cache_key
    ON video_cache (url_hash, settings_hash);
";

/// Cache key for one playback request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// SHA-256 of the raw source URL.
    pub url_hash: String,
    /// SHA-256 of the output-affecting settings.
    pub settings_hash: String,
}

impl CacheKey {
    pub fn new(url: &str, mirror_video: bool, flip_video: bool) -> Self {
        Self {
            url_hash: sha256_hex(url),
            settings_hash: sha256_hex(format!("mirror={};flip={}", mirror_video, flip_video)),
        }
    }
}

/// One row of the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub url_hash: String,
    pub settings_hash: String,
    /// Content hash of the artifact in the local mirror.
    pub hash: String,
    /// Worker job that produced the artifact.
    pub job_id: String,
}

/// Sqlite table mapping cache keys to content hashes.
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        let cache = Self { path };
        cache.connect()?.execute_batch(CACHE_SCHEMA)?;
        Ok(cache)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        open_connection(&self.path)
    }

    /// Newest entry for `key`.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.connect()?;
        let entry = conn
            .query_row(
                "SELECT id, url_hash, settings_hash, hash, job_id FROM video_cache
                 WHERE url_hash = ?1 AND settings_hash = ?2
                 ORDER BY id DESC LIMIT 1",
                params![&key.url_hash, &key.settings_hash],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Records `hash` for `key`. Returns false if the same entry already existed.
    pub fn insert(&self, key: &CacheKey, hash: &str, job_id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO video_cache (url_hash, settings_hash, hash, job_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![&key.url_hash, &key.settings_hash, hash, job_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, url_hash, settings_hash, hash, job_id FROM video_cache ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM video_cache WHERE id = ?1", [id])? > 0)
    }

    /// Removes every entry for which `keep` returns false. Returns how many were removed.
    pub fn sweep<F>(&self, keep: F) -> Result<usize, StoreError>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut removed = 0;
        for entry in self.entries()? {
            if !keep(&entry) && self.remove(entry.id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed cache entries without a local file");
        }
        Ok(removed)
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        id: row.get(0)?,
        url_hash: row.get(1)?,
        settings_hash: row.get(2)?,
        hash: row.get(3)?,
        job_id: row.get(4)?,
    })
}
