//! Durable cache of adjudicated field mappings.
//!
//! Two tiers: a [`DashMap`] in-memory map in front of an optional SQLite
//! database on disk. Reads check memory first and fall through to SQLite,
//! promoting hits back into memory; writes go through to both tiers, SQLite
//! first, so a successful [`put`](NormCache::put) is durable before it
//! returns. The `field` and `original_value` a key was derived from are
//! stored as explicit columns next to the opaque key, so listing and export
//! never have to parse key strings.
//!
//! Entries older than the retention window are never served: they are
//! dropped lazily on read and in bulk by [`sweep_expired`](NormCache::sweep_expired)
//! (also run when a persistent cache is opened). Rows that fail to decode
//! are treated as absent and logged, never surfaced to callers.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ApprovalTag;
use crate::key::CacheKey;

/// Default retention window for cache entries, in days.
pub const CACHE_EXPIRY_DAYS: u64 = 30;

/// One adjudicated mapping from a raw `(value, field)` pair to its canonical
/// form. Written whole on every mutation; never patched in place on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub normalized_value: String,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<ApprovalTag>,
    pub review_count: u32,
    pub last_reviewed: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// A fresh, never-reviewed entry stamped with the current time.
    pub fn new(normalized_value: impl Into<String>, confidence_score: f64, tag: ApprovalTag) -> Self {
        Self {
            normalized_value: normalized_value.into(),
            confidence_score,
            created_at: Utc::now(),
            approved_by: Some(tag),
            review_count: 0,
            last_reviewed: None,
        }
    }

    /// Record a post-creation edit: bump the review count, stamp the review
    /// time, and update provenance.
    pub fn mark_reviewed(&mut self, tag: ApprovalTag) {
        self.review_count += 1;
        self.last_reviewed = Some(Utc::now());
        self.approved_by = Some(tag);
    }
}

/// A cache entry together with the inputs its key was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRow {
    pub key: CacheKey,
    pub field: String,
    pub original_value: String,
    pub entry: CacheEntry,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS norm_cache (
    key              TEXT PRIMARY KEY,
    field            TEXT NOT NULL,
    original_value   TEXT NOT NULL,
    normalized_value TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    created_at       INTEGER NOT NULL,
    approved_by      TEXT,
    review_count     INTEGER NOT NULL,
    last_reviewed    INTEGER
);";

/// Two-tier normalization cache.
///
/// Single-row writes are atomic (`INSERT OR REPLACE`), so a crash mid-write
/// cannot corrupt unrelated entries. Last write wins; no cross-process
/// conflict detection.
pub struct NormCache {
    entries: DashMap<CacheKey, CachedRow>,
    conn: Option<Mutex<Connection>>,
    retention_days: u64,
}

impl NormCache {
    /// Create an in-memory-only cache (no disk persistence).
    pub fn new(retention_days: u64) -> Self {
        Self {
            entries: DashMap::new(),
            conn: None,
            retention_days,
        }
    }

    /// Open a persistent cache backed by a SQLite database at `path`.
    ///
    /// Expired rows are swept on open; the in-memory tier starts empty and
    /// fills lazily as entries are read.
    pub fn open(path: &Path, retention_days: u64) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_sqlite(path)?;
        conn.execute_batch(SCHEMA)?;
        let cache = Self {
            entries: DashMap::new(),
            conn: Some(Mutex::new(conn)),
            retention_days,
        };
        let swept = cache.sweep_expired();
        if swept > 0 {
            tracing::info!(swept, path = %path.display(), "removed expired cache entries on open");
        }
        Ok(cache)
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.retention_days as i64)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.created_at < self.cutoff()
    }

    fn lock_conn(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a live entry. Expired entries are removed and reported absent;
    /// rows that fail to decode are reported absent and logged.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(row) = self.entries.get(key) {
            if !self.is_expired(&row.entry) {
                return Some(row.entry.clone());
            }
            drop(row);
            self.entries.remove(key);
            // Fall through: the disk row carries the same timestamp and will
            // be dropped there too.
        }

        let conn = self.conn.as_ref()?;
        let row = {
            let conn = Self::lock_conn(conn);
            read_row(&conn, key)?
        };
        if self.is_expired(&row.entry) {
            let conn = Self::lock_conn(conn);
            let _ = conn.execute("DELETE FROM norm_cache WHERE key = ?1", params![key.as_str()]);
            tracing::debug!(key = %key, "dropped expired cache entry on read");
            return None;
        }
        let entry = row.entry.clone();
        self.entries.insert(key.clone(), row);
        Some(entry)
    }

    /// Insert or replace an entry. The write reaches disk before this
    /// returns; on storage failure nothing is cached and the error is
    /// returned for the caller to log and carry on without caching.
    pub fn put(
        &self,
        key: &CacheKey,
        field: &str,
        original_value: &str,
        entry: &CacheEntry,
    ) -> Result<(), CacheError> {
        if let Some(conn) = &self.conn {
            let conn = Self::lock_conn(conn);
            conn.execute(
                "INSERT OR REPLACE INTO norm_cache
                     (key, field, original_value, normalized_value, confidence_score,
                      created_at, approved_by, review_count, last_reviewed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key.as_str(),
                    field,
                    original_value,
                    entry.normalized_value,
                    entry.confidence_score,
                    entry.created_at.timestamp(),
                    entry.approved_by.map(|t| t.as_str()),
                    entry.review_count,
                    entry.last_reviewed.map(|t| t.timestamp()),
                ],
            )?;
        }
        self.entries.insert(
            key.clone(),
            CachedRow {
                key: key.clone(),
                field: field.to_string(),
                original_value: original_value.to_string(),
                entry: entry.clone(),
            },
        );
        Ok(())
    }

    /// Remove an entry. Deleting an absent key is not an error.
    pub fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(key);
        if let Some(conn) = &self.conn {
            let conn = Self::lock_conn(conn);
            conn.execute("DELETE FROM norm_cache WHERE key = ?1", params![key.as_str()])?;
        }
        Ok(())
    }

    /// Snapshot of every live entry. Order is not guaranteed.
    pub fn list(&self) -> Vec<CachedRow> {
        if let Some(conn) = &self.conn {
            let conn = Self::lock_conn(conn);
            let mut stmt = match conn.prepare(
                "SELECT key, field, original_value, normalized_value, confidence_score,
                        created_at, approved_by, review_count, last_reviewed
                 FROM norm_cache",
            ) {
                Ok(stmt) => stmt,
                Err(e) => {
                    tracing::warn!(error = %e, "cache list query failed");
                    return Vec::new();
                }
            };
            let rows = stmt
                .query_map([], decode_row)
                .map(|mapped| mapped.filter_map(|r| r.ok()).flatten().collect::<Vec<_>>())
                .unwrap_or_default();
            rows.into_iter()
                .filter(|row| !self.is_expired(&row.entry))
                .collect()
        } else {
            self.entries
                .iter()
                .map(|row| row.value().clone())
                .filter(|row| !self.is_expired(&row.entry))
                .collect()
        }
    }

    /// Delete every entry older than the retention window. Returns the
    /// number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = self.cutoff().timestamp();
        let mut mem_removed = 0usize;
        self.entries.retain(|_, row| {
            if row.entry.created_at.timestamp() < cutoff {
                mem_removed += 1;
                false
            } else {
                true
            }
        });
        if let Some(conn) = &self.conn {
            let conn = Self::lock_conn(conn);
            conn.execute("DELETE FROM norm_cache WHERE created_at < ?1", params![cutoff])
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "expiry sweep failed");
                    0
                })
        } else {
            mem_removed
        }
    }

    /// Number of stored entries (including any not yet swept).
    pub fn len(&self) -> usize {
        if let Some(conn) = &self.conn {
            let conn = Self::lock_conn(conn);
            conn.query_row("SELECT COUNT(*) FROM norm_cache", [], |row| row.get(0))
                .unwrap_or(0usize)
        } else {
            self.entries.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this cache is backed by a SQLite database.
    pub fn has_persistence(&self) -> bool {
        self.conn.is_some()
    }

    /// The configured retention window, in days.
    pub fn retention_days(&self) -> u64 {
        self.retention_days
    }
}

impl std::fmt::Debug for NormCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormCache")
            .field("mem_entries", &self.entries.len())
            .field("persistent", &self.has_persistence())
            .field("retention_days", &self.retention_days)
            .finish()
    }
}

/// Read one row by key. Absent and undecodable rows both come back as `None`
/// (the latter with a warning).
fn read_row(conn: &Connection, key: &CacheKey) -> Option<CachedRow> {
    let result = conn.query_row(
        "SELECT key, field, original_value, normalized_value, confidence_score,
                created_at, approved_by, review_count, last_reviewed
         FROM norm_cache WHERE key = ?1",
        params![key.as_str()],
        decode_row,
    );
    match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "undecodable cache row treated as miss");
            None
        }
    }
}

/// Decode a full row. Returns `Ok(None)` (logged) when a stored value cannot
/// be interpreted, so one bad row never breaks a scan.
fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<CachedRow>> {
    let key: String = row.get(0)?;
    let field: String = row.get(1)?;
    let original_value: String = row.get(2)?;
    let normalized_value: String = row.get(3)?;
    let confidence_score: f64 = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    let approved_by: Option<String> = row.get(6)?;
    let review_count: u32 = row.get(7)?;
    let last_reviewed: Option<i64> = row.get(8)?;

    let Some(created_at) = DateTime::from_timestamp(created_at, 0) else {
        tracing::warn!(key, "cache row has out-of-range timestamp, treated as miss");
        return Ok(None);
    };
    let approved_by = match approved_by {
        Some(s) => {
            let tag = ApprovalTag::parse(&s);
            if tag.is_none() {
                tracing::warn!(key, tag = s, "unknown approval tag on cache row");
            }
            tag
        }
        None => None,
    };
    let last_reviewed = last_reviewed.and_then(|secs| DateTime::from_timestamp(secs, 0));

    Ok(Some(CachedRow {
        key: CacheKey::from_stored(key),
        field,
        original_value,
        entry: CacheEntry {
            normalized_value,
            confidence_score,
            created_at,
            approved_by,
            review_count,
            last_reviewed,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(value: &str, confidence: f64) -> CacheEntry {
        CacheEntry::new(value, confidence, ApprovalTag::AutoApproved)
    }

    fn aged_entry(value: &str, confidence: f64, age_days: i64) -> CacheEntry {
        let mut e = entry(value, confidence);
        e.created_at = Utc::now() - Duration::days(age_days);
        e
    }

    #[test]
    fn miss_on_empty() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let key = CacheKey::derive("washington dc", "location");
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn hit_after_put() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let key = CacheKey::derive("washington dc", "location");
        cache
            .put(&key, "location", "washington dc", &entry("Washington, DC", 0.6))
            .unwrap();
        let got = cache.get(&key).unwrap();
        assert_eq!(got.normalized_value, "Washington, DC");
        assert_eq!(got.confidence_score, 0.6);
        assert_eq!(got.review_count, 0);
        assert!(got.last_reviewed.is_none());
    }

    #[test]
    fn same_value_different_fields_are_independent() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let loc = CacheKey::derive("dc", "location");
        let occ = CacheKey::derive("dc", "occupation");
        cache.put(&loc, "location", "dc", &entry("Washington, DC", 1.0)).unwrap();
        assert!(cache.get(&occ).is_none());
    }

    #[test]
    fn expired_entry_is_absent_and_lazily_dropped() {
        let cache = NormCache::new(30);
        let key = CacheKey::derive("old", "location");
        cache
            .put(&key, "location", "old", &aged_entry("Old Town", 0.9, 31))
            .unwrap();
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn entry_within_retention_is_served() {
        let cache = NormCache::new(30);
        let key = CacheKey::derive("recent", "location");
        cache
            .put(&key, "location", "recent", &aged_entry("Recent City", 0.9, 29))
            .unwrap();
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = NormCache::new(30);
        let old = CacheKey::derive("old", "location");
        let fresh = CacheKey::derive("fresh", "location");
        cache.put(&old, "location", "old", &aged_entry("Old", 0.9, 31)).unwrap();
        cache.put(&fresh, "location", "fresh", &aged_entry("Fresh", 0.9, 29)).unwrap();
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.get(&old).is_none());
        assert!(cache.get(&fresh).is_some());
    }

    #[test]
    fn delete_is_idempotent() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let key = CacheKey::derive("x", "location");
        cache.delete(&key).unwrap();
        cache.put(&key, "location", "x", &entry("X", 1.0)).unwrap();
        cache.delete(&key).unwrap();
        cache.delete(&key).unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn overwrite_replaces_whole_entry() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let key = CacheKey::derive("dev", "occupation");
        cache.put(&key, "occupation", "dev", &entry("Developer", 0.5)).unwrap();
        let mut updated = entry("Software Developer", 0.8);
        updated.mark_reviewed(ApprovalTag::UserApproved);
        cache.put(&key, "occupation", "dev", &updated).unwrap();
        let got = cache.get(&key).unwrap();
        assert_eq!(got.normalized_value, "Software Developer");
        assert_eq!(got.review_count, 1);
        assert_eq!(got.approved_by, Some(ApprovalTag::UserApproved));
        assert!(got.last_reviewed.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn list_carries_field_and_original_value() {
        let cache = NormCache::new(CACHE_EXPIRY_DAYS);
        let key = CacheKey::derive("  NYC  ", "location");
        cache.put(&key, "location", "nyc", &entry("New York City", 0.95)).unwrap();
        let rows = cache.list();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "location");
        assert_eq!(rows[0].original_value, "nyc");
        assert_eq!(rows[0].key, key);
    }

    // ── persistence ───────────────────────────────────────────────────

    #[test]
    fn persistent_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("washington dc", "location");

        {
            let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
            let mut e = entry("Washington, DC", 0.6);
            e.approved_by = Some(ApprovalTag::UserApproved);
            cache.put(&key, "location", "washington dc", &e).unwrap();
        }

        let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
        let got = cache.get(&key).unwrap();
        assert_eq!(got.normalized_value, "Washington, DC");
        assert_eq!(got.confidence_score, 0.6);
        assert_eq!(got.approved_by, Some(ApprovalTag::UserApproved));
    }

    #[test]
    fn timestamps_round_trip_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("teacher", "occupation");

        let mut e = aged_entry("High School Teacher", 0.7, 3);
        e.mark_reviewed(ApprovalTag::ManualReview);
        // Timestamps are stored at second precision.
        e.created_at = DateTime::from_timestamp(e.created_at.timestamp(), 0).unwrap();
        e.last_reviewed = e
            .last_reviewed
            .map(|t| DateTime::from_timestamp(t.timestamp(), 0).unwrap());

        {
            let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
            cache.put(&key, "occupation", "teacher", &e).unwrap();
        }
        let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
        let got = cache.get(&key).unwrap();
        assert_eq!(got.created_at, e.created_at);
        assert_eq!(got.last_reviewed, e.last_reviewed);
    }

    #[test]
    fn expired_rows_swept_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("old", "location");

        {
            let cache = NormCache::open(&path, 30).unwrap();
            cache.put(&key, "location", "old", &aged_entry("Old", 0.9, 31)).unwrap();
        }
        let cache = NormCache::open(&path, 30).unwrap();
        assert_eq!(cache.len(), 0);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn corrupted_row_is_treated_as_miss() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("bad", "location");

        {
            let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
            cache.put(&key, "location", "bad", &entry("Bad Town", 0.9)).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE norm_cache SET confidence_score = 'garbage' WHERE key = ?1",
                params![key.as_str()],
            )
            .unwrap();
        }
        let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn unknown_approval_tag_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("x", "location");

        {
            let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
            cache.put(&key, "location", "x", &entry("X Ville", 0.9)).unwrap();
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE norm_cache SET approved_by = 'mystery' WHERE key = ?1",
                params![key.as_str()],
            )
            .unwrap();
        }
        let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
        let got = cache.get(&key).unwrap();
        assert_eq!(got.approved_by, None);
        assert_eq!(got.normalized_value, "X Ville");
    }

    #[test]
    fn memory_tier_promotes_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::derive("nyc", "location");

        {
            let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
            cache.put(&key, "location", "nyc", &entry("New York City", 0.95)).unwrap();
        }
        let cache = NormCache::open(&path, CACHE_EXPIRY_DAYS).unwrap();
        assert!(cache.get(&key).is_some());
        // Second read is served from the promoted in-memory row.
        assert!(cache.get(&key).is_some());
    }
}
