//! Web search result cache keyed by normalized query.
//!
//! One row per normalized query, replaced atomically on every store. Freshness
//! is decided at read time against `created_at`; nothing is precomputed, so the
//! same row can be fresh for one caller's age limit and stale for another's.
use crate::memory_db::schema::*;
use crate::utils::{expiry_cutoff, format_timestamp, parse_timestamp, TextUtils};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub const DEFAULT_MAX_AGE_HOURS: u32 = 24;
pub const CACHE_SOURCE_SUFFIX: &str = " (cache)";
const TOP_QUERIES_LIMIT: i64 = 5;

const ENTRY_COLUMNS: &str = "id, query, query_normalized, results, source, created_at, hit_count";

pub struct SearchCacheStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SearchCacheStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Fresh cached results for `query`, counting the hit.
    ///
    /// `Ok(None)` when nothing is cached, the entry is older than
    /// `max_age_hours`, or the stored result list cannot be parsed.
    pub fn lookup(&self, query: &str, max_age_hours: u32) -> anyhow::Result<Option<CachedSearch>> {
        self.lookup_at(query, max_age_hours, Utc::now())
    }

    pub(crate) fn lookup_at(
        &self,
        query: &str,
        max_age_hours: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<CachedSearch>> {
        let normalized = TextUtils::normalize_query(query);
        let cutoff = format_timestamp(&expiry_cutoff(now, max_age_hours));

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let entry = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM web_search_cache
                 WHERE query_normalized = ?1 AND created_at > ?2
                 ORDER BY created_at DESC
                 LIMIT 1",
                ENTRY_COLUMNS
            ))?;
            let mut rows = stmt.query(params![&normalized, &cutoff])?;
            match rows.next()? {
                Some(row) => Self::row_to_entry(row)?,
                None => {
                    debug!("Cache miss for '{}'", normalized);
                    return Ok(None);
                }
            }
        };

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Malformed cached results for '{}', treating as miss: {}", normalized, e);
                return Ok(None);
            }
        };

        tx.execute(
            "UPDATE web_search_cache SET hit_count = hit_count + 1 WHERE id = ?1",
            [entry.id],
        )?;
        tx.commit()?;

        let hit_count = entry.hit_count + 1;
        debug!("Cache hit for '{}' ({} hits)", normalized, hit_count);
        Ok(Some(CachedSearch {
            query: entry.query,
            results: entry.results,
            source: format!("{}{}", entry.source, CACHE_SOURCE_SUFFIX),
            cached_at: entry.created_at,
            hit_count,
        }))
    }

    /// Replace whatever is cached under the normalized form of `query`.
    ///
    /// A single upsert, so a concurrent lookup sees either the old or the new
    /// entry and never an empty gap.
    pub fn store(&self, query: &str, results: &[serde_json::Value], source: &str) -> anyhow::Result<CacheWriteReceipt> {
        self.store_at(query, results, source, Utc::now())
    }

    pub(crate) fn store_at(
        &self,
        query: &str,
        results: &[serde_json::Value],
        source: &str,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<CacheWriteReceipt> {
        let normalized = TextUtils::normalize_query(query);
        let results_json = serde_json::to_string(results)?;

        let conn = self.get_conn()?;
        let id: i64 = conn.query_row(
            "INSERT INTO web_search_cache (query, query_normalized, results, source, created_at, hit_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(query_normalized) DO UPDATE SET
                 query = excluded.query,
                 results = excluded.results,
                 source = excluded.source,
                 created_at = excluded.created_at,
                 hit_count = 0
             RETURNING id",
            params![query, &normalized, results_json, source, format_timestamp(&created_at)],
            |row| row.get(0),
        )?;

        debug!("Cached {} results for '{}' from {}", results.len(), normalized, source);
        Ok(CacheWriteReceipt { id, query: query.to_string(), results_count: results.len() })
    }

    /// Current entry for `query` regardless of age, without counting a hit
    pub fn peek(&self, query: &str) -> anyhow::Result<Option<CacheEntry>> {
        let normalized = TextUtils::normalize_query(query);
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM web_search_cache WHERE query_normalized = ?1",
            ENTRY_COLUMNS
        ))?;
        let mut rows = stmt.query([&normalized])?;
        match rows.next()? {
            Some(row) => Ok(Self::row_to_entry(row)?.ok()),
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> anyhow::Result<CacheStats> {
        let conn = self.get_conn()?;
        let (total_cached, total_hits): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM web_search_cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT query, hit_count, created_at FROM web_search_cache
             ORDER BY hit_count DESC, created_at DESC
             LIMIT ?1",
        )?;
        let mut rows = stmt.query([TOP_QUERIES_LIMIT])?;
        let mut top_queries = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at = parse_timestamp(&row.get::<_, String>(2)?)
                .unwrap_or_else(|| { warn!("Failed parse cache created_at"); Utc::now() });
            top_queries.push(TopQuery { query: row.get(0)?, hit_count: row.get(1)?, created_at });
        }

        Ok(CacheStats { total_cached, total_hits, top_queries })
    }

    /// Delete cached entries and return how many went.
    ///
    /// Without an age every entry is removed. With one, exactly the entries a
    /// lookup with that same age limit would refuse are removed.
    pub fn purge(&self, older_than_hours: Option<u32>) -> anyhow::Result<usize> {
        self.purge_at(older_than_hours, Utc::now())
    }

    pub(crate) fn purge_at(&self, older_than_hours: Option<u32>, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let conn = self.get_conn()?;
        let deleted = match older_than_hours {
            Some(hours) => {
                let cutoff = format_timestamp(&expiry_cutoff(now, hours));
                conn.execute("DELETE FROM web_search_cache WHERE created_at <= ?1", [cutoff])?
            }
            None => conn.execute("DELETE FROM web_search_cache", [])?,
        };

        info!("Purged {} cache entries (older than: {:?} hours)", deleted, older_than_hours);
        Ok(deleted)
    }

    /// Outer error is a column read failure; inner is an unparseable result list.
    fn row_to_entry(row: &Row) -> rusqlite::Result<Result<CacheEntry, serde_json::Error>> {
        let results_json: String = row.get(3)?;
        let created_at = parse_timestamp(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse cache created_at"); Utc::now() });

        let id = row.get(0)?;
        let query = row.get(1)?;
        let query_normalized = row.get(2)?;
        let source = row.get(4)?;
        let hit_count = row.get(6)?;

        Ok(serde_json::from_str(&results_json).map(|results| CacheEntry {
            id,
            query,
            query_normalized,
            results,
            source,
            created_at,
            hit_count,
        }))
    }

    pub fn contains(&self, query: &str) -> anyhow::Result<bool> {
        let normalized = TextUtils::normalize_query(query);
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM web_search_cache WHERE query_normalized = ?1",
                [&normalized],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
