//! Batch crawl/extract pipeline: collaborator seams, outcome
//! classification, dedup reconciliation, and cache write-back.
//!
//! Crawling and extraction are external collaborators consumed through
//! the [`Crawler`] and [`Extractor`] traits; everything downstream of
//! their results (timing classification, recheck scheduling, identity
//! resolution, cache state) is decided here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hsof_cache::{SqliteOpportunityStore, UrlCache};
use hsof_core::{
    Clock, CrawlOutcome, OpportunityCandidate, RecheckScheduler, ScheduleSignals,
    TimingClassifier, TimingType, UrlNormalizer,
};

pub const CRATE_NAME: &str = "hsof-sync";

/// Single in-run retry delay when a retryable fetch error carries no
/// structured retry-after hint.
const DEFAULT_RETRY_DELAY: StdDuration = StdDuration::from_millis(500);

/// Crawl failure with typed retryability. Collaborators decide
/// `retryable` and `retry_after` themselves; nothing here matches on
/// error message text.
#[derive(Debug, Clone, Error)]
#[error("fetch failed: {message}")]
pub struct FetchError {
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<StdDuration>,
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub text: String,
}

/// Consumed crawler interface: given a URL, return extracted page text
/// or a typed failure.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str) -> std::result::Result<CrawledPage, FetchError>;
}

#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// Page parsed but yielded no usable opportunity.
    #[error("extraction rejected: {0}")]
    Rejected(String),
    /// Wrong content type: guide, listicle, aggregator.
    #[error("blocked content: {0}")]
    Blocked(String),
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub confidence: f64,
    pub candidate: Option<OpportunityCandidate>,
}

/// Consumed extractor interface: given page text, return a structured
/// candidate with a confidence score.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, url: &str)
        -> std::result::Result<Extraction, ExtractError>;
}

/// Storage lookups the reconciler needs to resolve candidate identity.
pub trait IdentityStore {
    fn find_id_by_url(&self, canonical_url: &str) -> Result<Option<Uuid>>;
    fn find_id_by_identity_key(&self, identity_key: &str) -> Result<Option<Uuid>>;
}

impl IdentityStore for SqliteOpportunityStore {
    fn find_id_by_url(&self, canonical_url: &str) -> Result<Option<Uuid>> {
        Ok(SqliteOpportunityStore::find_id_by_url(self, canonical_url)?)
    }

    fn find_id_by_identity_key(&self, identity_key: &str) -> Result<Option<Uuid>> {
        Ok(SqliteOpportunityStore::find_id_by_identity_key(
            self,
            identity_key,
        )?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityResolution {
    /// Candidate matches an existing record; update it in place.
    Update(Uuid),
    /// New identity; insert with a fresh id.
    Insert,
    /// Identity already accepted earlier in this run; drop the
    /// candidate.
    Duplicate,
}

/// Decides whether a candidate is a new record, an update, or an
/// intra-run duplicate. URL match wins over title+organization match;
/// the title+organization fallback catches the same opportunity
/// republished at a different URL.
pub struct Reconciler {
    normalizer: UrlNormalizer,
    accepted_keys: HashSet<String>,
}

impl Reconciler {
    pub fn new(normalizer: UrlNormalizer) -> Self {
        Self {
            normalizer,
            accepted_keys: HashSet::new(),
        }
    }

    /// Lowercase, keep alphanumerics and whitespace, collapse runs.
    pub fn normalize_fragment(input: &str) -> String {
        input
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn identity_key(title: &str, organization: &str) -> String {
        format!(
            "{}|{}",
            Self::normalize_fragment(title),
            Self::normalize_fragment(organization)
        )
    }

    pub fn resolve(
        &mut self,
        candidate: &OpportunityCandidate,
        store: &dyn IdentityStore,
    ) -> Result<IdentityResolution> {
        let key = Self::identity_key(&candidate.title, &candidate.organization);
        if self.accepted_keys.contains(&key) {
            debug!(%key, "intra-run duplicate dropped");
            return Ok(IdentityResolution::Duplicate);
        }

        let canonical = self.normalizer.normalize(&candidate.url);
        let resolution = if let Some(id) = store
            .find_id_by_url(&canonical)
            .context("identity lookup by url")?
        {
            IdentityResolution::Update(id)
        } else if let Some(id) = store
            .find_id_by_identity_key(&key)
            .context("identity lookup by title/organization")?
        {
            IdentityResolution::Update(id)
        } else {
            IdentityResolution::Insert
        };
        self.accepted_keys.insert(key);
        Ok(resolution)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bounded extraction fan-out; protects downstream API rate limits.
    pub concurrency: usize,
    /// "Unseen within N days" window for candidate filtering. `None`
    /// means any cached entry counts as seen.
    pub seen_within_days: Option<u32>,
    /// Crawled text below this length is invalid without invoking
    /// extraction.
    pub min_text_len: usize,
    /// Extractions below this confidence are low-confidence regardless
    /// of extractor success.
    pub min_confidence: f64,
    /// Cap on URLs drained per recheck run.
    pub recheck_batch_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            seen_within_days: Some(7),
            min_text_len: 100,
            min_confidence: 0.4,
            recheck_batch_limit: 200,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("HSOF_CONCURRENCY").unwrap_or(defaults.concurrency),
            seen_within_days: env_parse("HSOF_SEEN_WITHIN_DAYS").or(defaults.seen_within_days),
            min_text_len: env_parse("HSOF_MIN_TEXT_LEN").unwrap_or(defaults.min_text_len),
            min_confidence: env_parse("HSOF_MIN_CONFIDENCE").unwrap_or(defaults.min_confidence),
            recheck_batch_limit: env_parse("HSOF_RECHECK_LIMIT")
                .unwrap_or(defaults.recheck_batch_limit),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidate_urls: usize,
    pub skipped_seen: usize,
    pub processed: usize,
    pub fetch_failures: usize,
    pub content_too_short: usize,
    pub rejected: usize,
    pub low_confidence: usize,
    pub blocked: usize,
    pub expired: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl BatchSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, candidate_urls: usize, skipped_seen: usize) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            candidate_urls,
            skipped_seen,
            processed: 0,
            fetch_failures: 0,
            content_too_short: 0,
            rejected: 0,
            low_confidence: 0,
            blocked: 0,
            expired: 0,
            duplicates: 0,
            inserted: 0,
            updated: 0,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing batch summary")
    }
}

/// One outcome per URL, produced by the concurrent fan-out and consumed
/// by the sequential apply phase.
#[derive(Debug)]
struct UrlOutcome {
    url: String,
    outcome: CrawlOutcome,
    candidate: Option<OpportunityCandidate>,
    note: Option<String>,
}

/// Drives a batch through the URL lifecycle: seen-filtering, bounded
/// crawl/extract fan-out, then a sequential apply phase that classifies
/// timing, schedules the next recheck, reconciles identity, and writes
/// the cache. Cancellation mid-batch leaves unapplied URLs in their
/// previous cache state; they retry naturally on the next run.
pub struct SyncPipeline {
    cache: Arc<UrlCache>,
    store: Arc<SqliteOpportunityStore>,
    crawler: Arc<dyn Crawler>,
    extractor: Arc<dyn Extractor>,
    normalizer: UrlNormalizer,
    classifier: TimingClassifier,
    scheduler: RecheckScheduler,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        cache: Arc<UrlCache>,
        store: Arc<SqliteOpportunityStore>,
        crawler: Arc<dyn Crawler>,
        extractor: Arc<dyn Extractor>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            store,
            crawler,
            extractor,
            normalizer: UrlNormalizer,
            classifier: TimingClassifier::default(),
            scheduler: RecheckScheduler::default(),
            clock,
            config,
        }
    }

    /// Process candidate URLs gathered by discovery sources, skipping
    /// ones already seen within the freshness window.
    pub async fn run_batch(&self, urls: Vec<String>) -> Result<BatchSummary> {
        self.run(urls, true).await
    }

    /// Drain the due-recheck queue through the same pipeline. No seen
    /// filter: these URLs are due precisely because they were seen.
    pub async fn run_rechecks(&self) -> Result<BatchSummary> {
        let due = self
            .cache
            .get_pending_rechecks(self.config.recheck_batch_limit)
            .context("loading recheck queue")?;
        let urls = due.into_iter().map(|(url, _)| url).collect();
        self.run(urls, false).await
    }

    async fn run(&self, urls: Vec<String>, filter_seen: bool) -> Result<BatchSummary> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();

        // Dedupe by canonical form, preserving first-seen order.
        let mut canonical_seen = HashSet::new();
        let mut candidates = Vec::new();
        for url in urls {
            if canonical_seen.insert(self.normalizer.normalize(&url)) {
                candidates.push(url);
            }
        }
        let candidate_urls = candidates.len();

        let to_process = if filter_seen {
            self.cache
                .filter_unseen(&candidates, self.config.seen_within_days)
                .context("filtering seen urls")?
        } else {
            candidates
        };
        let skipped_seen = candidate_urls - to_process.len();

        // Bounded fan-out. The driver constructs exactly one outcome per
        // URL, so no two tasks ever write the same cache key.
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = Vec::with_capacity(to_process.len());
        for url in to_process {
            let semaphore = semaphore.clone();
            let crawler = self.crawler.clone();
            let extractor = self.extractor.clone();
            let min_text_len = self.config.min_text_len;
            let min_confidence = self.config.min_confidence;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore not closed");
                fetch_and_extract(&*crawler, &*extractor, &url, min_text_len, min_confidence)
                    .await
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.await.context("pipeline task panicked")?);
        }

        // Sequential apply phase: timing classification, scheduling,
        // identity resolution, cache write-back.
        let mut reconciler = Reconciler::new(self.normalizer);
        let mut summary = BatchSummary::new(run_id, started_at, candidate_urls, skipped_seen);
        for outcome in outcomes {
            self.apply(outcome, &mut reconciler, &mut summary)?;
        }

        summary.finished_at = self.clock.now();
        info!(
            run_id = %summary.run_id,
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            duplicates = summary.duplicates,
            fetch_failures = summary.fetch_failures,
            "batch complete"
        );
        Ok(summary)
    }

    fn apply(
        &self,
        outcome: UrlOutcome,
        reconciler: &mut Reconciler,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let UrlOutcome {
            url,
            outcome,
            candidate,
            note,
        } = outcome;
        summary.processed += 1;

        if outcome != CrawlOutcome::Extracted {
            let days = self.scheduler.next_interval_days(outcome, None);
            self.cache
                .mark_seen(&url, outcome.status(), Some(days), note.as_deref())
                .with_context(|| format!("recording outcome for {url}"))?;
            match outcome {
                CrawlOutcome::FetchFailed => summary.fetch_failures += 1,
                CrawlOutcome::ContentTooShort => summary.content_too_short += 1,
                CrawlOutcome::ExtractionRejected => summary.rejected += 1,
                CrawlOutcome::LowConfidence => summary.low_confidence += 1,
                CrawlOutcome::Blocked => summary.blocked += 1,
                _ => {}
            }
            return Ok(());
        }

        let Some(mut candidate) = candidate else {
            // Extracted without a candidate is a collaborator bug; take
            // the conservative rejection path rather than crashing the
            // batch.
            warn!(%url, "extractor reported success without a candidate");
            let days = self
                .scheduler
                .next_interval_days(CrawlOutcome::ExtractionRejected, None);
            self.cache
                .mark_seen(&url, CrawlOutcome::ExtractionRejected.status(), Some(days), None)
                .with_context(|| format!("recording outcome for {url}"))?;
            summary.rejected += 1;
            return Ok(());
        };

        let now = self.clock.now();
        self.classifier.classify_candidate(&mut candidate, now);

        // One-time opportunities past grace are terminal: long interval,
        // no upsert. Previously persisted rows stay (archiving is an
        // external concern).
        if candidate.timing_type == Some(TimingType::OneTime) && candidate.is_expired {
            let days = self
                .scheduler
                .next_interval_days(CrawlOutcome::ExpiredOneTime, None);
            self.cache
                .mark_seen(
                    &url,
                    CrawlOutcome::ExpiredOneTime.status(),
                    Some(days),
                    Some(&candidate.title),
                )
                .with_context(|| format!("recording outcome for {url}"))?;
            summary.expired += 1;
            return Ok(());
        }

        match reconciler.resolve(&candidate, self.store.as_ref())? {
            IdentityResolution::Duplicate => {
                let days = self
                    .scheduler
                    .next_interval_days(CrawlOutcome::Duplicate, None);
                self.cache
                    .mark_seen(
                        &url,
                        CrawlOutcome::Duplicate.status(),
                        Some(days),
                        Some(&candidate.title),
                    )
                    .with_context(|| format!("recording outcome for {url}"))?;
                summary.duplicates += 1;
            }
            resolution => {
                let canonical = self.normalizer.normalize(&candidate.url);
                let key = Reconciler::identity_key(&candidate.title, &candidate.organization);
                // Upsert before mark_seen: a failed write leaves the URL
                // unseen so the next run retries it.
                match resolution {
                    IdentityResolution::Update(id) => {
                        self.store
                            .update(id, &candidate, &canonical, &key)
                            .with_context(|| format!("updating opportunity for {canonical}"))?;
                        summary.updated += 1;
                    }
                    _ => {
                        self.store
                            .insert(&candidate, &canonical, &key)
                            .with_context(|| format!("inserting opportunity for {canonical}"))?;
                        summary.inserted += 1;
                    }
                }
                let signals = ScheduleSignals::from_candidate(&candidate);
                let days = self
                    .scheduler
                    .next_interval_days(CrawlOutcome::Extracted, Some(&signals));
                self.cache
                    .mark_seen(
                        &url,
                        CrawlOutcome::Extracted.status(),
                        Some(days),
                        Some(&candidate.title),
                    )
                    .with_context(|| format!("recording outcome for {url}"))?;
            }
        }
        Ok(())
    }
}

async fn fetch_and_extract(
    crawler: &dyn Crawler,
    extractor: &dyn Extractor,
    url: &str,
    min_text_len: usize,
    min_confidence: f64,
) -> UrlOutcome {
    let first_attempt = crawler.crawl(url).await;
    let fetched = match first_attempt {
        Err(err) if err.retryable => {
            // One in-run retry honoring the collaborator's retry-after
            // hint; anything beyond that is the recheck scheduler's job.
            let delay = err.retry_after.unwrap_or(DEFAULT_RETRY_DELAY);
            debug!(url, ?delay, "retrying fetch");
            tokio::time::sleep(delay).await;
            crawler.crawl(url).await
        }
        other => other,
    };

    let page = match fetched {
        Ok(page) => page,
        Err(err) => {
            return UrlOutcome {
                url: url.to_string(),
                outcome: CrawlOutcome::FetchFailed,
                candidate: None,
                note: Some(err.to_string()),
            };
        }
    };

    if page.text.len() < min_text_len {
        return UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::ContentTooShort,
            candidate: None,
            note: Some(format!("{} bytes of text", page.text.len())),
        };
    }

    match extractor.extract(&page.text, url).await {
        Err(ExtractError::Blocked(reason)) => UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::Blocked,
            candidate: None,
            note: Some(reason),
        },
        Err(ExtractError::Rejected(reason)) => UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::ExtractionRejected,
            candidate: None,
            note: Some(reason),
        },
        Ok(extraction) if extraction.confidence < min_confidence => UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::LowConfidence,
            candidate: None,
            note: Some(format!("confidence {:.2}", extraction.confidence)),
        },
        Ok(Extraction {
            candidate: Some(candidate),
            ..
        }) => UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::Extracted,
            candidate: Some(candidate),
            note: None,
        },
        Ok(Extraction { candidate: None, .. }) => UrlOutcome {
            url: url.to_string(),
            outcome: CrawlOutcome::ExtractionRejected,
            candidate: None,
            note: Some("no candidate returned".to_string()),
        },
    }
}
