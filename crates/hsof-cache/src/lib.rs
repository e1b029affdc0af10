//! SQLite-backed URL cache and opportunity store for HSOF.
//!
//! The cache is the single writer of `url_cache` rows. Each write is one
//! atomic upsert statement, so concurrent tasks touching distinct URLs
//! cannot tear rows; a mutex around the connection serializes the actual
//! I/O. Storage errors always propagate: a failed write must never be
//! silently treated as "seen".

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use hsof_core::{
    CacheEntry, CacheStatus, Clock, OpportunityCandidate, PersistedOpportunity, UnrecognizedValue,
    UrlNormalizer,
};

pub const CRATE_NAME: &str = "hsof-cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("corrupt stored value {0:?}")]
    Corrupt(String),
    #[error(transparent)]
    Value(#[from] UnrecognizedValue),
}

pub type Result<T> = std::result::Result<T, CacheError>;

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width UTC form so lexicographic comparison in SQL matches
    // chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| CacheError::Corrupt(raw.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    raw.parse::<NaiveDate>()
        .map_err(|_| CacheError::Corrupt(raw.to_string()))
}

/// Per-status totals plus the due-now queue depth.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total: u64,
    pub due_now: u64,
    pub by_status: Vec<(CacheStatus, u64)>,
}

/// Persistent map from canonical URL to last-known crawl outcome and
/// next eligible recheck time.
pub struct UrlCache {
    conn: Mutex<Connection>,
    normalizer: UrlNormalizer,
    clock: Arc<dyn Clock>,
}

impl UrlCache {
    pub fn open(
        path: impl AsRef<Path>,
        normalizer: UrlNormalizer,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, normalizer, clock)
    }

    pub fn open_in_memory(normalizer: UrlNormalizer, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, normalizer, clock)
    }

    fn from_connection(
        conn: Connection,
        normalizer: UrlNormalizer,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS url_cache (
                url TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                status TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_checked TEXT NOT NULL,
                next_recheck TEXT,
                check_count INTEGER NOT NULL DEFAULT 1,
                success_count INTEGER NOT NULL DEFAULT 0,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_url_cache_domain ON url_cache(domain);
            CREATE INDEX IF NOT EXISTS idx_url_cache_status ON url_cache(status);
            CREATE INDEX IF NOT EXISTS idx_url_cache_next_recheck ON url_cache(next_recheck);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            normalizer,
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("cache mutex poisoned")
    }

    /// True if an entry exists for the normalized URL; with
    /// `within_days`, the entry must also have been checked inside that
    /// window.
    pub fn is_seen(&self, url: &str, within_days: Option<u32>) -> Result<bool> {
        let canonical = self.normalizer.normalize(url);
        let last_checked: Option<String> = self
            .lock()
            .query_row(
                "SELECT last_checked FROM url_cache WHERE url = ?1",
                [&canonical],
                |row| row.get(0),
            )
            .optional()?;
        let Some(last_checked) = last_checked else {
            return Ok(false);
        };
        match within_days {
            None => Ok(true),
            Some(days) => {
                let cutoff = self.clock.now() - Duration::days(i64::from(days));
                Ok(parse_ts(&last_checked)? >= cutoff)
            }
        }
    }

    /// Upsert the entry for a URL after a check. On insert the counters
    /// start at `check_count = 1`; on update `check_count` always
    /// increments and `success_count` only for successes. `expires_days
    /// = None` persists a NULL `next_recheck` ("do not reschedule").
    pub fn mark_seen(
        &self,
        url: &str,
        status: CacheStatus,
        expires_days: Option<u32>,
        notes: Option<&str>,
    ) -> Result<()> {
        let canonical = self.normalizer.normalize(url);
        let domain = self.normalizer.domain_of(&canonical).unwrap_or_default();
        let now = self.clock.now();
        let next_recheck =
            expires_days.map(|days| fmt_ts(now + Duration::days(i64::from(days))));
        let success_increment: u32 = u32::from(status == CacheStatus::Success);

        self.lock().execute(
            "INSERT INTO url_cache
                 (url, domain, status, first_seen, last_checked, next_recheck,
                  check_count, success_count, notes)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, 1, ?6, ?7)
             ON CONFLICT(url) DO UPDATE SET
                 status = excluded.status,
                 last_checked = excluded.last_checked,
                 next_recheck = excluded.next_recheck,
                 check_count = url_cache.check_count + 1,
                 success_count = url_cache.success_count + excluded.success_count,
                 notes = excluded.notes",
            params![
                canonical,
                domain,
                status.as_str(),
                fmt_ts(now),
                next_recheck,
                success_increment,
                notes,
            ],
        )?;
        debug!(url = %canonical, status = %status, ?expires_days, "cache write");
        Ok(())
    }

    /// Entries due for recheck, oldest first. Only `success` and
    /// `failed` entries qualify; the other statuses stay parked until a
    /// human/process decision re-enters them.
    pub fn get_pending_rechecks(&self, limit: usize) -> Result<Vec<(String, CacheStatus)>> {
        let now = fmt_ts(self.clock.now());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT url, status FROM url_cache
             WHERE next_recheck IS NOT NULL
               AND next_recheck <= ?1
               AND status IN ('success', 'failed')
             ORDER BY next_recheck ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut pending = Vec::new();
        for row in rows {
            let (url, status) = row?;
            pending.push((url, status.parse::<CacheStatus>()?));
        }
        Ok(pending)
    }

    /// Subset of `urls` not yet seen (within the window), input order
    /// preserved. Callers dedupe their own input.
    pub fn filter_unseen(&self, urls: &[String], within_days: Option<u32>) -> Result<Vec<String>> {
        let mut unseen = Vec::new();
        for url in urls {
            if !self.is_seen(url, within_days)? {
                unseen.push(url.clone());
            }
        }
        Ok(unseen)
    }

    /// Delete stale `failed`/`blocked`/`invalid` entries. Successful
    /// discoveries are permanent history and are never deleted here.
    pub fn clear_old_entries(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = fmt_ts(self.clock.now() - Duration::days(i64::from(older_than_days)));
        let deleted = self.lock().execute(
            "DELETE FROM url_cache
             WHERE last_checked < ?1
               AND status IN ('failed', 'blocked', 'invalid')",
            [&cutoff],
        )?;
        debug!(deleted, older_than_days, "cleared stale cache entries");
        Ok(deleted)
    }

    pub fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let canonical = self.normalizer.normalize(url);
        let row = self
            .lock()
            .query_row(
                "SELECT url, domain, status, first_seen, last_checked, next_recheck,
                        check_count, success_count, notes
                 FROM url_cache WHERE url = ?1",
                [&canonical],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, u32>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;
        let Some((url, domain, status, first_seen, last_checked, next_recheck, checks, successes, notes)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            url,
            domain,
            status: status.parse()?,
            first_seen: parse_ts(&first_seen)?,
            last_checked: parse_ts(&last_checked)?,
            next_recheck: next_recheck.as_deref().map(parse_ts).transpose()?,
            check_count: checks,
            success_count: successes,
            notes,
        }))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let now = fmt_ts(self.clock.now());
        let conn = self.lock();
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM url_cache", [], |row| row.get(0))?;
        let due_now: u64 = conn.query_row(
            "SELECT COUNT(*) FROM url_cache
             WHERE next_recheck IS NOT NULL
               AND next_recheck <= ?1
               AND status IN ('success', 'failed')",
            [&now],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM url_cache GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        let mut by_status = Vec::new();
        for row in rows {
            let (status, count) = row?;
            by_status.push((status.parse::<CacheStatus>()?, count));
        }
        Ok(CacheStats {
            total,
            due_now,
            by_status,
        })
    }
}

/// Persisted opportunity records, keyed by canonical URL with a
/// secondary normalized title+organization identity key. This store only
/// persists identity and dates; expiry flags are derived data and are
/// recomputed by the classifier, never read back as truth.
pub struct SqliteOpportunityStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteOpportunityStore {
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                organization TEXT NOT NULL,
                identity_key TEXT NOT NULL,
                kind TEXT,
                timing_type TEXT,
                deadline TEXT,
                start_date TEXT,
                end_date TEXT,
                recheck_days INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_opportunities_identity
                ON opportunities(identity_key);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    pub fn find_id_by_url(&self, canonical_url: &str) -> Result<Option<Uuid>> {
        self.find_id("SELECT id FROM opportunities WHERE url = ?1", canonical_url)
    }

    pub fn find_id_by_identity_key(&self, identity_key: &str) -> Result<Option<Uuid>> {
        self.find_id(
            "SELECT id FROM opportunities WHERE identity_key = ?1 LIMIT 1",
            identity_key,
        )
    }

    fn find_id(&self, sql: &str, key: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = self
            .lock()
            .query_row(sql, [key], |row| row.get(0))
            .optional()?;
        id.map(|raw| Uuid::parse_str(&raw).map_err(|_| CacheError::Corrupt(raw)))
            .transpose()
    }

    /// Insert a new record with a fresh identifier.
    pub fn insert(
        &self,
        candidate: &OpportunityCandidate,
        canonical_url: &str,
        identity_key: &str,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = fmt_ts(self.clock.now());
        self.lock().execute(
            "INSERT INTO opportunities
                 (id, url, title, organization, identity_key, kind, timing_type,
                  deadline, start_date, end_date, recheck_days, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                id.to_string(),
                canonical_url,
                candidate.title,
                candidate.organization,
                identity_key,
                candidate.kind.map(|kind| kind.as_str()),
                candidate.timing_type.map(|timing| timing.as_str()),
                candidate.deadline.map(|date| date.to_string()),
                candidate.start_date.map(|date| date.to_string()),
                candidate.end_date.map(|date| date.to_string()),
                candidate.recheck_days,
                now,
            ],
        )?;
        debug!(%id, url = canonical_url, "opportunity inserted");
        Ok(id)
    }

    /// Update an existing record in place, refreshing its identity
    /// fields and dates. The row keeps its id and created_at.
    pub fn update(
        &self,
        id: Uuid,
        candidate: &OpportunityCandidate,
        canonical_url: &str,
        identity_key: &str,
    ) -> Result<()> {
        let now = fmt_ts(self.clock.now());
        let changed = self.lock().execute(
            "UPDATE opportunities SET
                 url = ?2,
                 title = ?3,
                 organization = ?4,
                 identity_key = ?5,
                 kind = ?6,
                 timing_type = ?7,
                 deadline = ?8,
                 start_date = ?9,
                 end_date = ?10,
                 recheck_days = ?11,
                 updated_at = ?12
             WHERE id = ?1",
            params![
                id.to_string(),
                canonical_url,
                candidate.title,
                candidate.organization,
                identity_key,
                candidate.kind.map(|kind| kind.as_str()),
                candidate.timing_type.map(|timing| timing.as_str()),
                candidate.deadline.map(|date| date.to_string()),
                candidate.start_date.map(|date| date.to_string()),
                candidate.end_date.map(|date| date.to_string()),
                candidate.recheck_days,
                now,
            ],
        )?;
        if changed == 0 {
            return Err(CacheError::Corrupt(format!("missing opportunity {id}")));
        }
        debug!(%id, url = canonical_url, "opportunity updated");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<PersistedOpportunity>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, url, title, organization, kind, timing_type,
                        deadline, start_date, end_date, recheck_days,
                        created_at, updated_at
                 FROM opportunities WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, u32>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, String>(11)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, url, title, organization, kind, timing, deadline, start, end, days, created, updated)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(PersistedOpportunity {
            id: Uuid::parse_str(&id).map_err(|_| CacheError::Corrupt(id))?,
            url,
            title,
            organization,
            kind: kind.as_deref().map(str::parse).transpose()?,
            timing_type: timing.as_deref().map(str::parse).transpose()?,
            deadline: deadline.as_deref().map(parse_date).transpose()?,
            start_date: start.as_deref().map(parse_date).transpose()?,
            end_date: end.as_deref().map(parse_date).transpose()?,
            recheck_days: days,
            created_at: parse_ts(&created)?,
            updated_at: parse_ts(&updated)?,
        }))
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self
            .lock()
            .query_row("SELECT COUNT(*) FROM opportunities", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hsof_core::ManualClock;
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    fn test_cache() -> (UrlCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = UrlCache::open_in_memory(UrlNormalizer, clock.clone()).expect("open cache");
        (cache, clock)
    }

    #[test]
    fn insert_then_update_keeps_counts_monotone() {
        let (cache, _clock) = test_cache();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, Some(14), None)
            .unwrap();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Failed, Some(7), Some("timeout"))
            .unwrap();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, Some(14), None)
            .unwrap();

        let entry = cache.get("https://a.com/p").unwrap().unwrap();
        assert_eq!(entry.check_count, 3);
        assert_eq!(entry.success_count, 2);
        assert!(entry.success_count <= entry.check_count);
        assert_eq!(entry.status, CacheStatus::Success);
    }

    #[test]
    fn status_reflects_latest_outcome_only() {
        let (cache, _clock) = test_cache();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, Some(14), None)
            .unwrap();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Failed, Some(7), Some("503"))
            .unwrap();
        let entry = cache.get("https://a.com/p").unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Failed);
        assert_eq!(entry.success_count, 1);
        assert_eq!(entry.notes.as_deref(), Some("503"));
    }

    #[test]
    fn equivalent_urls_share_one_entry() {
        let (cache, _clock) = test_cache();
        cache
            .mark_seen(
                "https://www.a.com/p/?utm_source=mail",
                CacheStatus::Success,
                Some(14),
                None,
            )
            .unwrap();
        assert!(cache.is_seen("https://a.com/p", None).unwrap());
        let entry = cache.get("a.com/p").unwrap().unwrap();
        assert_eq!(entry.url, "https://a.com/p");
        assert_eq!(entry.domain, "a.com");
        assert_eq!(entry.check_count, 1);
    }

    #[test]
    fn is_seen_honors_the_freshness_window() {
        let (cache, clock) = test_cache();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, Some(30), None)
            .unwrap();
        clock.advance(Duration::days(8));
        assert!(cache.is_seen("https://a.com/p", None).unwrap());
        assert!(!cache.is_seen("https://a.com/p", Some(7)).unwrap());
        assert!(cache.is_seen("https://a.com/p", Some(30)).unwrap());
    }

    #[test]
    fn recheck_becomes_due_after_the_interval() {
        let (cache, clock) = test_cache();
        cache
            .mark_seen("http://a.com/p", CacheStatus::Success, Some(14), None)
            .unwrap();
        assert!(cache.get_pending_rechecks(10).unwrap().is_empty());

        clock.advance(Duration::days(15));
        let pending = cache.get_pending_rechecks(10).unwrap();
        assert_eq!(
            pending,
            vec![("http://a.com/p".to_string(), CacheStatus::Success)]
        );
    }

    #[test]
    fn non_recheckable_statuses_never_enter_the_queue() {
        let (cache, clock) = test_cache();
        for (url, status) in [
            ("https://a.com/invalid", CacheStatus::Invalid),
            ("https://a.com/blocked", CacheStatus::Blocked),
            ("https://a.com/expired", CacheStatus::Expired),
            ("https://a.com/lowconf", CacheStatus::LowConfidence),
            ("https://a.com/dup", CacheStatus::Duplicate),
        ] {
            cache.mark_seen(url, status, Some(1), None).unwrap();
        }
        cache
            .mark_seen("https://a.com/failed", CacheStatus::Failed, Some(1), None)
            .unwrap();

        clock.advance(Duration::days(400));
        let pending = cache.get_pending_rechecks(100).unwrap();
        assert_eq!(
            pending,
            vec![("https://a.com/failed".to_string(), CacheStatus::Failed)]
        );
    }

    #[test]
    fn null_next_recheck_means_never_due() {
        let (cache, clock) = test_cache();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, None, None)
            .unwrap();
        clock.advance(Duration::days(1000));
        assert!(cache.get_pending_rechecks(10).unwrap().is_empty());
        let entry = cache.get("https://a.com/p").unwrap().unwrap();
        assert_eq!(entry.next_recheck, None);
    }

    #[test]
    fn pending_rechecks_order_by_due_time_and_honor_limit() {
        let (cache, clock) = test_cache();
        cache
            .mark_seen("https://a.com/later", CacheStatus::Success, Some(10), None)
            .unwrap();
        cache
            .mark_seen("https://a.com/sooner", CacheStatus::Success, Some(2), None)
            .unwrap();
        clock.advance(Duration::days(11));
        let pending = cache.get_pending_rechecks(10).unwrap();
        assert_eq!(pending[0].0, "https://a.com/sooner");
        assert_eq!(pending[1].0, "https://a.com/later");
        assert_eq!(cache.get_pending_rechecks(1).unwrap().len(), 1);
    }

    #[test]
    fn next_recheck_is_last_checked_plus_interval() {
        let (cache, _clock) = test_cache();
        cache
            .mark_seen("https://a.com/p", CacheStatus::Success, Some(14), None)
            .unwrap();
        let entry = cache.get("https://a.com/p").unwrap().unwrap();
        assert_eq!(
            entry.next_recheck,
            Some(entry.last_checked + Duration::days(14))
        );
        assert_eq!(entry.first_seen, entry.last_checked);
    }

    #[test]
    fn filter_unseen_preserves_input_order() {
        let (cache, _clock) = test_cache();
        cache
            .mark_seen("https://a.com/seen", CacheStatus::Success, Some(14), None)
            .unwrap();
        let urls = vec![
            "https://a.com/z".to_string(),
            "https://a.com/seen".to_string(),
            "https://a.com/b".to_string(),
        ];
        let unseen = cache.filter_unseen(&urls, None).unwrap();
        assert_eq!(unseen, vec!["https://a.com/z", "https://a.com/b"]);
    }

    #[test]
    fn cleanup_spares_successes_and_fresh_failures() {
        let (cache, clock) = test_cache();
        cache
            .mark_seen("https://a.com/old-success", CacheStatus::Success, Some(14), None)
            .unwrap();
        cache
            .mark_seen("https://a.com/old-failed", CacheStatus::Failed, Some(7), None)
            .unwrap();
        cache
            .mark_seen("https://a.com/old-blocked", CacheStatus::Blocked, Some(90), None)
            .unwrap();
        clock.advance(Duration::days(120));
        cache
            .mark_seen("https://a.com/new-failed", CacheStatus::Failed, Some(7), None)
            .unwrap();

        let deleted = cache.clear_old_entries(90).unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.is_seen("https://a.com/old-success", None).unwrap());
        assert!(cache.is_seen("https://a.com/new-failed", None).unwrap());
        assert!(!cache.is_seen("https://a.com/old-failed", None).unwrap());
        assert!(!cache.is_seen("https://a.com/old-blocked", None).unwrap());
    }

    #[test]
    fn cache_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cache.db");
        let clock = Arc::new(ManualClock::new(t0()));
        {
            let cache = UrlCache::open(&path, UrlNormalizer, clock.clone()).unwrap();
            cache
                .mark_seen("https://a.com/p", CacheStatus::Success, Some(14), Some("STEM fair"))
                .unwrap();
        }
        let cache = UrlCache::open(&path, UrlNormalizer, clock).unwrap();
        let entry = cache.get("https://a.com/p").unwrap().unwrap();
        assert_eq!(entry.notes.as_deref(), Some("STEM fair"));
        assert_eq!(entry.check_count, 1);
    }

    fn sample_candidate() -> OpportunityCandidate {
        let mut candidate = OpportunityCandidate::new(
            "https://a.com/essay",
            "Essay Contest",
            "Civic Society",
        );
        candidate.kind = Some(hsof_core::OpportunityKind::Competition);
        candidate.timing_type = Some(hsof_core::TimingType::Annual);
        candidate.deadline = NaiveDate::from_ymd_opt(2026, 5, 1);
        candidate
    }

    #[test]
    fn store_insert_find_and_update_round_trip() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = SqliteOpportunityStore::open_in_memory(clock.clone()).unwrap();
        let candidate = sample_candidate();
        let id = store
            .insert(&candidate, "https://a.com/essay", "essay contest|civic society")
            .unwrap();

        assert_eq!(store.find_id_by_url("https://a.com/essay").unwrap(), Some(id));
        assert_eq!(
            store
                .find_id_by_identity_key("essay contest|civic society")
                .unwrap(),
            Some(id)
        );
        assert_eq!(store.find_id_by_url("https://a.com/other").unwrap(), None);

        clock.advance(Duration::days(3));
        let mut renamed = candidate.clone();
        renamed.title = "Essay Contest 2026".to_string();
        store
            .update(id, &renamed, "https://a.com/essay", "essay contest 2026|civic society")
            .unwrap();

        let persisted = store.get(id).unwrap().unwrap();
        assert_eq!(persisted.title, "Essay Contest 2026");
        assert_eq!(persisted.deadline, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert!(persisted.updated_at > persisted.created_at);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn updating_a_missing_row_is_an_error() {
        let store =
            SqliteOpportunityStore::open_in_memory(Arc::new(ManualClock::new(t0()))).unwrap();
        let err = store
            .update(Uuid::new_v4(), &sample_candidate(), "https://a.com/x", "x|y")
            .unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }
}
