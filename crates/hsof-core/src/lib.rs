//! Core domain model for HSOF: opportunity records, URL canonicalization,
//! timing classification, and recheck scheduling.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "hsof-core";

/// Default recheck interval for candidates with no stronger signal.
pub const DEFAULT_RECHECK_DAYS: u32 = 14;

/// A stored string did not match any variant of a closed enum.
///
/// Surfaced to the caller instead of silently coercing to a default
/// category; parse boundaries log it and fall back to the conservative
/// branch explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {field} value {value:?}")]
pub struct UnrecognizedValue {
    pub field: &'static str,
    pub value: String,
}

/// Last-known outcome for a cached URL. Reflects the latest check only,
/// not history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Success,
    Failed,
    Invalid,
    Blocked,
    Expired,
    LowConfidence,
    Duplicate,
    Pending,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Success => "success",
            CacheStatus::Failed => "failed",
            CacheStatus::Invalid => "invalid",
            CacheStatus::Blocked => "blocked",
            CacheStatus::Expired => "expired",
            CacheStatus::LowConfidence => "low_confidence",
            CacheStatus::Duplicate => "duplicate",
            CacheStatus::Pending => "pending",
        }
    }

    /// Whether entries with this status may re-enter the recheck queue
    /// automatically. Everything else needs a human/process decision.
    pub fn recheckable(&self) -> bool {
        matches!(self, CacheStatus::Success | CacheStatus::Failed)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStatus {
    type Err = UnrecognizedValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CacheStatus::Success),
            "failed" => Ok(CacheStatus::Failed),
            "invalid" => Ok(CacheStatus::Invalid),
            "blocked" => Ok(CacheStatus::Blocked),
            "expired" => Ok(CacheStatus::Expired),
            "low_confidence" => Ok(CacheStatus::LowConfidence),
            "duplicate" => Ok(CacheStatus::Duplicate),
            "pending" => Ok(CacheStatus::Pending),
            other => Err(UnrecognizedValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Recurrence category of an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingType {
    OneTime,
    Annual,
    Recurring,
    Rolling,
    Ongoing,
    Seasonal,
}

impl TimingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingType::OneTime => "one_time",
            TimingType::Annual => "annual",
            TimingType::Recurring => "recurring",
            TimingType::Rolling => "rolling",
            TimingType::Ongoing => "ongoing",
            TimingType::Seasonal => "seasonal",
        }
    }

    /// Cyclic timings reopen on a cadence; an expired cycle implies a
    /// future one.
    pub fn is_cyclic(&self) -> bool {
        matches!(
            self,
            TimingType::Annual | TimingType::Recurring | TimingType::Seasonal
        )
    }
}

impl fmt::Display for TimingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimingType {
    type Err = UnrecognizedValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(TimingType::OneTime),
            "annual" => Ok(TimingType::Annual),
            "recurring" => Ok(TimingType::Recurring),
            "rolling" => Ok(TimingType::Rolling),
            "ongoing" => Ok(TimingType::Ongoing),
            "seasonal" => Ok(TimingType::Seasonal),
            other => Err(UnrecognizedValue {
                field: "timing_type",
                value: other.to_string(),
            }),
        }
    }
}

/// What kind of opportunity a record describes. Drives the per-category
/// recheck defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Competition,
    Internship,
    Scholarship,
    Research,
    Program,
    Other,
}

impl OpportunityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityKind::Competition => "competition",
            OpportunityKind::Internship => "internship",
            OpportunityKind::Scholarship => "scholarship",
            OpportunityKind::Research => "research",
            OpportunityKind::Program => "program",
            OpportunityKind::Other => "other",
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityKind {
    type Err = UnrecognizedValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "competition" => Ok(OpportunityKind::Competition),
            "internship" => Ok(OpportunityKind::Internship),
            "scholarship" => Ok(OpportunityKind::Scholarship),
            "research" => Ok(OpportunityKind::Research),
            "program" => Ok(OpportunityKind::Program),
            "other" => Ok(OpportunityKind::Other),
            other => Err(UnrecognizedValue {
                field: "kind",
                value: other.to_string(),
            }),
        }
    }
}

/// One row of the URL cache, keyed by canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub domain: String,
    pub status: CacheStatus,
    pub first_seen: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    /// `None` means "do not reschedule". When present, always equals
    /// `last_checked + interval` as fixed at write time.
    pub next_recheck: Option<DateTime<Utc>>,
    pub check_count: u32,
    pub success_count: u32,
    pub notes: Option<String>,
}

/// Structured record produced by extraction. The derived fields
/// (`is_expired`, `next_cycle_expected`) are always recomputed by the
/// timing classifier from the dates and "now", never carried as
/// independent source-of-truth flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityCandidate {
    pub url: String,
    pub title: String,
    pub organization: String,
    pub kind: Option<OpportunityKind>,
    pub timing_type: Option<TimingType>,
    pub deadline: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_expired: bool,
    pub next_cycle_expected: Option<NaiveDate>,
    pub recheck_days: u32,
}

impl OpportunityCandidate {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            organization: organization.into(),
            kind: None,
            timing_type: None,
            deadline: None,
            start_date: None,
            end_date: None,
            is_expired: false,
            next_cycle_expected: None,
            recheck_days: DEFAULT_RECHECK_DAYS,
        }
    }

    /// True when at least one temporal bound was extracted.
    pub fn has_dates(&self) -> bool {
        self.deadline.is_some() || self.start_date.is_some() || self.end_date.is_some()
    }
}

/// Persisted opportunity row as seen by the reconciler. Created on first
/// successful upsert, updated in place afterwards, never hard-deleted by
/// this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedOpportunity {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub organization: String,
    pub kind: Option<OpportunityKind>,
    pub timing_type: Option<TimingType>,
    pub deadline: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub recheck_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Injected time source so classification, scheduling, and cache queries
/// are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

const TRACKING_PARAM_KEYS: &[&str] = &["gclid", "fbclid", "mc_cid", "mc_eid"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAM_KEYS.contains(&key.as_str())
}

/// Canonicalizes URLs so equivalent forms collapse to one cache key.
///
/// Fail-open: anything that cannot be parsed comes back unchanged, so a
/// malformed URL degrades to its own cache entry instead of aborting a
/// batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlNormalizer;

impl UrlNormalizer {
    pub fn normalize(&self, raw: &str) -> String {
        match self.try_normalize(raw) {
            Some(canonical) => canonical,
            None => raw.to_string(),
        }
    }

    /// Host of the canonical form, used for the cache's derived
    /// `domain` column.
    pub fn domain_of(&self, raw: &str) -> Option<String> {
        let canonical = self.normalize(raw);
        let parsed = Url::parse(&canonical).ok()?;
        parsed.host_str().map(|host| host.to_string())
    }

    fn try_normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let parsed = match Url::parse(trimmed) {
            Ok(url) => url,
            // Scheme-less input like "example.com/page" defaults to https.
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(&format!("https://{trimmed}")).ok()?
            }
            Err(_) => return None,
        };

        let host = parsed.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        let kept_params: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut canonical = format!("{}://{}", parsed.scheme(), host);
        if let Some(port) = parsed.port() {
            canonical.push_str(&format!(":{port}"));
        }
        canonical.push_str(parsed.path().trim_end_matches('/'));
        if !kept_params.is_empty() {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &kept_params {
                query.append_pair(key, value);
            }
            canonical.push('?');
            canonical.push_str(&query.finish());
        }
        // Fragment dropped entirely.
        Some(canonical)
    }
}

/// Expiration verdict for a candidate's declared timing and dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingVerdict {
    pub is_expired: bool,
    pub next_cycle_expected: Option<NaiveDate>,
}

impl TimingVerdict {
    fn live() -> Self {
        Self {
            is_expired: false,
            next_cycle_expected: None,
        }
    }
}

/// Computes expiration status and next-cycle estimates from a timing
/// type, the extracted dates, and an injected "now". Pure and total:
/// absent dates simply don't constrain expiration.
#[derive(Debug, Clone, Copy)]
pub struct TimingClassifier {
    /// Days a one-time opportunity stays live past its deadline.
    pub grace_days: i64,
}

impl Default for TimingClassifier {
    fn default() -> Self {
        Self { grace_days: 30 }
    }
}

impl TimingClassifier {
    pub fn classify(
        &self,
        timing_type: Option<TimingType>,
        deadline: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> TimingVerdict {
        let today = now.date_naive();
        let Some(timing) = timing_type else {
            // Unverifiable timing; the scheduler shortens the interval
            // via the has_valid_dates signal instead.
            return TimingVerdict::live();
        };

        // Deadline takes precedence over end date when both are present.
        let reference = deadline.or(end_date);

        match timing {
            TimingType::Rolling | TimingType::Ongoing => TimingVerdict::live(),
            TimingType::Annual | TimingType::Recurring | TimingType::Seasonal => match reference {
                Some(date) if date < today => TimingVerdict {
                    is_expired: true,
                    next_cycle_expected: Some(plus_one_year(date)),
                },
                _ => TimingVerdict::live(),
            },
            TimingType::OneTime => match reference {
                Some(date) if date < today => {
                    let grace_cutoff = (now - Duration::days(self.grace_days)).date_naive();
                    // Pages often stay informative briefly after the
                    // deadline; within the grace window the record is
                    // still treated as live.
                    TimingVerdict {
                        is_expired: date < grace_cutoff,
                        next_cycle_expected: None,
                    }
                }
                _ => TimingVerdict::live(),
            },
        }
    }

    /// Recompute the derived expiry fields on a candidate in place.
    pub fn classify_candidate(&self, candidate: &mut OpportunityCandidate, now: DateTime<Utc>) {
        let verdict = self.classify(
            candidate.timing_type,
            candidate.deadline,
            candidate.end_date,
            now,
        );
        candidate.is_expired = verdict.is_expired;
        candidate.next_cycle_expected = verdict.next_cycle_expected;
    }
}

fn plus_one_year(date: NaiveDate) -> NaiveDate {
    date.with_year(date.year() + 1).unwrap_or_else(|| {
        // Feb 29 has no counterpart next year; land on Feb 28.
        NaiveDate::from_ymd_opt(date.year() + 1, 2, 28).unwrap_or(date)
    })
}

/// Outcome classes that drive recheck intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Network-level crawl failure.
    FetchFailed,
    /// Extractor rejected the page (parse failure, no usable content).
    ExtractionRejected,
    /// Crawled text too short or structurally invalid.
    ContentTooShort,
    /// Extraction confidence below threshold.
    LowConfidence,
    /// Wrong content type: guide, listicle, aggregator page.
    Blocked,
    /// One-time opportunity past its grace window.
    ExpiredOneTime,
    /// Candidate resolved to an identity already accepted this run.
    Duplicate,
    /// Extraction succeeded and timing classification ran.
    Extracted,
}

impl CrawlOutcome {
    /// Cache status recorded for this outcome.
    pub fn status(&self) -> CacheStatus {
        match self {
            CrawlOutcome::FetchFailed => CacheStatus::Failed,
            CrawlOutcome::ExtractionRejected | CrawlOutcome::ContentTooShort => {
                CacheStatus::Invalid
            }
            CrawlOutcome::LowConfidence => CacheStatus::LowConfidence,
            CrawlOutcome::Blocked => CacheStatus::Blocked,
            CrawlOutcome::ExpiredOneTime => CacheStatus::Expired,
            CrawlOutcome::Duplicate => CacheStatus::Duplicate,
            CrawlOutcome::Extracted => CacheStatus::Success,
        }
    }
}

/// Classification-derived inputs to the scheduler, available only when
/// extraction succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSignals {
    pub kind: Option<OpportunityKind>,
    pub timing_type: Option<TimingType>,
    pub is_expired: bool,
    pub has_valid_dates: bool,
}

impl ScheduleSignals {
    pub fn from_candidate(candidate: &OpportunityCandidate) -> Self {
        Self {
            kind: candidate.kind,
            timing_type: candidate.timing_type,
            is_expired: candidate.is_expired,
            has_valid_dates: candidate.has_dates(),
        }
    }
}

/// Derives the next recheck interval from outcome, category, and
/// classification signals. Minimum always wins: suspicious signals
/// (undated records, expired-but-cyclic) shorten the interval, never
/// lengthen it, because stale data costs more than a wasted recheck.
#[derive(Debug, Clone, Copy)]
pub struct RecheckScheduler {
    /// Floor when a record carries no usable dates.
    pub undated_floor_days: u32,
    /// Floor for expired cyclic opportunities awaiting next-cycle
    /// publication.
    pub expired_cycle_floor_days: u32,
}

impl Default for RecheckScheduler {
    fn default() -> Self {
        Self {
            undated_floor_days: 7,
            expired_cycle_floor_days: 3,
        }
    }
}

impl RecheckScheduler {
    pub fn next_interval_days(
        &self,
        outcome: CrawlOutcome,
        signals: Option<&ScheduleSignals>,
    ) -> u32 {
        match outcome {
            CrawlOutcome::FetchFailed => 7,
            CrawlOutcome::ExtractionRejected => 14,
            CrawlOutcome::ContentTooShort => 30,
            CrawlOutcome::LowConfidence => 30,
            CrawlOutcome::Blocked => 90,
            CrawlOutcome::ExpiredOneTime => 365,
            // Inert: duplicates never re-enter the recheck queue, but a
            // finite interval keeps next_recheck = last_checked + interval
            // uniform across rows.
            CrawlOutcome::Duplicate => 90,
            CrawlOutcome::Extracted => match signals {
                Some(signals) => self.classified_interval(signals),
                // Extracted without signals is a programmer error
                // upstream; take the conservative short interval.
                None => self.undated_floor_days,
            },
        }
    }

    fn classified_interval(&self, signals: &ScheduleSignals) -> u32 {
        let mut days = self.type_default_days(signals);
        if !signals.has_valid_dates {
            days = days.min(self.undated_floor_days);
        }
        if signals.is_expired && signals.timing_type.is_some_and(|t| t.is_cyclic()) {
            days = days.min(self.expired_cycle_floor_days);
        }
        days
    }

    fn type_default_days(&self, signals: &ScheduleSignals) -> u32 {
        if let Some(kind) = signals.kind {
            return match kind {
                OpportunityKind::Competition => 7,
                OpportunityKind::Internship => 14,
                OpportunityKind::Scholarship => 30,
                OpportunityKind::Research => 21,
                OpportunityKind::Program | OpportunityKind::Other => DEFAULT_RECHECK_DAYS,
            };
        }
        match signals.timing_type {
            Some(TimingType::Rolling) => 30,
            Some(TimingType::Ongoing) => 60,
            Some(TimingType::Recurring) | Some(TimingType::Annual) => 21,
            Some(TimingType::Seasonal) => 30,
            Some(TimingType::OneTime) | None => DEFAULT_RECHECK_DAYS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = UrlNormalizer;
        let inputs = [
            "https://www.example.com/a/?utm_source=x&id=3#frag",
            "example.com/path/",
            "HTTP://EXAMPLE.COM:8080/A?b=1&fbclid=zzz",
            "not a url at all",
        ];
        for input in inputs {
            let once = normalizer.normalize(input);
            assert_eq!(normalizer.normalize(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn tracking_params_slash_www_and_fragment_collapse() {
        let normalizer = UrlNormalizer;
        assert_eq!(
            normalizer.normalize("https://www.x.com/a/?utm_source=y"),
            normalizer.normalize("https://x.com/a"),
        );
        assert_eq!(
            normalizer.normalize("https://x.com/a#section"),
            "https://x.com/a",
        );
        assert_eq!(
            normalizer.normalize("https://x.com/a?gclid=1&keep=2&UTM_CAMPAIGN=3"),
            "https://x.com/a?keep=2",
        );
    }

    #[test]
    fn missing_scheme_defaults_to_https() {
        assert_eq!(
            UrlNormalizer.normalize("example.org/apply"),
            "https://example.org/apply"
        );
    }

    #[test]
    fn unparseable_input_passes_through_unchanged() {
        assert_eq!(UrlNormalizer.normalize("::::"), "::::");
        assert_eq!(UrlNormalizer.normalize(""), "");
    }

    #[test]
    fn domain_of_strips_www() {
        assert_eq!(
            UrlNormalizer.domain_of("https://www.example.com/a"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn one_time_within_grace_is_still_live() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 30);
        let verdict = classifier.classify(
            Some(TimingType::OneTime),
            Some(day(2026, 6, 20)),
            None,
            now,
        );
        assert!(!verdict.is_expired);
        assert_eq!(verdict.next_cycle_expected, None);
    }

    #[test]
    fn one_time_beyond_grace_expires() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 30);
        let verdict = classifier.classify(
            Some(TimingType::OneTime),
            Some(day(2026, 5, 21)),
            None,
            now,
        );
        assert!(verdict.is_expired);
        assert_eq!(verdict.next_cycle_expected, None);
    }

    #[test]
    fn grace_window_is_inclusive_at_the_boundary() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 30);
        // Exactly 30 days ago: now - 30d <= reference holds.
        let verdict = classifier.classify(
            Some(TimingType::OneTime),
            Some(day(2026, 5, 31)),
            None,
            now,
        );
        assert!(!verdict.is_expired);
    }

    #[test]
    fn annual_rollover_advances_one_year() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 3, 10);
        let verdict = classifier.classify(
            Some(TimingType::Annual),
            Some(day(2026, 3, 5)),
            None,
            now,
        );
        assert!(verdict.is_expired);
        assert_eq!(verdict.next_cycle_expected, Some(day(2027, 3, 5)));
    }

    #[test]
    fn leap_day_rolls_over_to_feb_28() {
        let classifier = TimingClassifier::default();
        let now = at(2024, 6, 1);
        let verdict = classifier.classify(
            Some(TimingType::Seasonal),
            Some(day(2024, 2, 29)),
            None,
            now,
        );
        assert!(verdict.is_expired);
        assert_eq!(verdict.next_cycle_expected, Some(day(2025, 2, 28)));
    }

    #[test]
    fn deadline_takes_precedence_over_end_date() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 1);
        // Deadline in the future wins over a past end date.
        let verdict = classifier.classify(
            Some(TimingType::Annual),
            Some(day(2026, 9, 1)),
            Some(day(2026, 1, 1)),
            now,
        );
        assert!(!verdict.is_expired);
    }

    #[test]
    fn recurring_falls_back_to_end_date_without_deadline() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 1);
        let verdict =
            classifier.classify(Some(TimingType::Recurring), None, Some(day(2026, 4, 2)), now);
        assert!(verdict.is_expired);
        assert_eq!(verdict.next_cycle_expected, Some(day(2027, 4, 2)));
    }

    #[test]
    fn rolling_and_ongoing_never_expire() {
        let classifier = TimingClassifier::default();
        let now = at(2026, 6, 1);
        for timing in [TimingType::Rolling, TimingType::Ongoing] {
            let verdict = classifier.classify(Some(timing), Some(day(2020, 1, 1)), None, now);
            assert!(!verdict.is_expired, "{timing}");
            assert_eq!(verdict.next_cycle_expected, None);
        }
    }

    #[test]
    fn absent_dates_never_expire() {
        let classifier = TimingClassifier::default();
        let verdict = classifier.classify(Some(TimingType::Annual), None, None, at(2026, 6, 1));
        assert!(!verdict.is_expired);
        let verdict = classifier.classify(None, None, None, at(2026, 6, 1));
        assert!(!verdict.is_expired);
    }

    #[test]
    fn scheduler_base_table() {
        let scheduler = RecheckScheduler::default();
        assert_eq!(scheduler.next_interval_days(CrawlOutcome::FetchFailed, None), 7);
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::ExtractionRejected, None),
            14
        );
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::ContentTooShort, None),
            30
        );
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::LowConfidence, None),
            30
        );
        assert_eq!(scheduler.next_interval_days(CrawlOutcome::Blocked, None), 90);
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::ExpiredOneTime, None),
            365
        );
    }

    #[test]
    fn undated_scholarship_shortens_to_seven_days() {
        let scheduler = RecheckScheduler::default();
        let signals = ScheduleSignals {
            kind: Some(OpportunityKind::Scholarship),
            timing_type: Some(TimingType::Annual),
            is_expired: false,
            has_valid_dates: false,
        };
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::Extracted, Some(&signals)),
            7
        );
    }

    #[test]
    fn expired_annual_polls_every_three_days() {
        let scheduler = RecheckScheduler::default();
        let signals = ScheduleSignals {
            kind: Some(OpportunityKind::Scholarship),
            timing_type: Some(TimingType::Annual),
            is_expired: true,
            has_valid_dates: true,
        };
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::Extracted, Some(&signals)),
            3
        );
    }

    #[test]
    fn expired_one_time_signal_does_not_use_the_cycle_floor() {
        let scheduler = RecheckScheduler::default();
        let signals = ScheduleSignals {
            kind: None,
            timing_type: Some(TimingType::OneTime),
            is_expired: true,
            has_valid_dates: true,
        };
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::Extracted, Some(&signals)),
            DEFAULT_RECHECK_DAYS
        );
    }

    #[test]
    fn category_default_beats_timing_default() {
        let scheduler = RecheckScheduler::default();
        let signals = ScheduleSignals {
            kind: Some(OpportunityKind::Competition),
            timing_type: Some(TimingType::Ongoing),
            is_expired: false,
            has_valid_dates: true,
        };
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::Extracted, Some(&signals)),
            7
        );
        let signals = ScheduleSignals {
            kind: None,
            timing_type: Some(TimingType::Ongoing),
            is_expired: false,
            has_valid_dates: true,
        };
        assert_eq!(
            scheduler.next_interval_days(CrawlOutcome::Extracted, Some(&signals)),
            60
        );
    }

    #[test]
    fn statuses_round_trip_and_reject_unknowns() {
        for status in [
            CacheStatus::Success,
            CacheStatus::Failed,
            CacheStatus::Invalid,
            CacheStatus::Blocked,
            CacheStatus::Expired,
            CacheStatus::LowConfidence,
            CacheStatus::Duplicate,
            CacheStatus::Pending,
        ] {
            assert_eq!(status.as_str().parse::<CacheStatus>().unwrap(), status);
        }
        let err = "definitely_not_a_status".parse::<CacheStatus>().unwrap_err();
        assert_eq!(err.field, "status");
    }

    #[test]
    fn only_success_and_failed_are_recheckable() {
        assert!(CacheStatus::Success.recheckable());
        assert!(CacheStatus::Failed.recheckable());
        for status in [
            CacheStatus::Invalid,
            CacheStatus::Blocked,
            CacheStatus::Expired,
            CacheStatus::LowConfidence,
            CacheStatus::Duplicate,
            CacheStatus::Pending,
        ] {
            assert!(!status.recheckable(), "{status}");
        }
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at(2026, 1, 1));
        clock.advance(Duration::days(15));
        assert_eq!(clock.now(), at(2026, 1, 16));
    }
}
