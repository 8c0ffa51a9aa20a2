//! Three-phase crawl pipeline for one category
//!
//! 1. Enumerate listing pages, filter items against known keys, queue the rest
//! 2. Fetch queued details in batches and bulk-upsert them as records
//! 3. Fetch sub-records of the upserted records and bulk-upsert them
//!
//! Every request goes through the rate controller, both for classification
//! and for the delay before the next one. The listing cursor is persisted
//! after every page so a crashed or paused session resumes where it stopped.

use crate::config::CrawlerConfig;
use crate::crawler::dedup::{ExistingIdCache, Freshness};
use crate::crawler::fetcher::{Exchange, SourceClient};
use crate::crawler::schema::{
    flatten_sub_records, parse_detail, parse_listing, sub_record_content, CatalogItemRef,
    FlatSubRecord, SubRecordGroup,
};
use crate::progress::{ProgressStore, SessionStats};
use crate::rate::{RateAdaptiveController, RecommendedAction};
use crate::state::CrawlCounters;
use crate::storage::{CatalogRecord, CatalogStore, SubRecord};
use crate::{CrawlError, HarvestError};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Longest uninterrupted sleep; the stop flag is checked in between
const PAUSE_SLICE: Duration = Duration::from_millis(250);

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The listing was exhausted and every queued item was processed
    Completed,
    /// The stop flag was cleared
    Stopped,
    /// A session limit was reached; the cursor is kept for the next session
    Paused,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
        }
    }
}

/// Why enumeration stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationEnd {
    /// Too many consecutive empty pages
    Exhausted,
    Stopped,
    Deadline,
    PageLimit,
    /// The detail queue reached the per-worker ceiling
    QueueFull,
}

/// Result of one enumeration phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationSummary {
    pub pages: u32,
    pub queued: usize,
    pub skipped: usize,
    pub failed_pages: u32,
    pub end: EnumerationEnd,
}

/// Everything a pipeline needs from the outside
pub struct PipelineContext {
    pub client: SourceClient,
    pub store: Box<dyn CatalogStore>,
    pub progress: ProgressStore,
    pub rate: Arc<Mutex<RateAdaptiveController>>,
    /// Cleared to request a cooperative stop
    pub running: Arc<AtomicBool>,
    pub counters: Arc<CrawlCounters>,
}

/// Sub-record groups waiting for their parent to be resolved
#[derive(Debug)]
struct PendingSubRecords {
    parent_slug: String,
    groups: Vec<SubRecordGroup>,
}

/// Session-interrupting condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Stopped,
    Deadline,
}

/// Crawl pipeline for a single category
pub struct CrawlPipeline {
    category: String,
    config: CrawlerConfig,
    client: SourceClient,
    store: Box<dyn CatalogStore>,
    progress: ProgressStore,
    rate: Arc<Mutex<RateAdaptiveController>>,
    running: Arc<AtomicBool>,
    counters: Arc<CrawlCounters>,
    config_hash: Option<String>,
    known: Option<ExistingIdCache>,
    detail_queue: VecDeque<CatalogItemRef>,
    sub_record_queue: VecDeque<PendingSubRecords>,
    deadline: Option<Instant>,
}

fn lock_rate(rate: &Mutex<RateAdaptiveController>) -> MutexGuard<'_, RateAdaptiveController> {
    rate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feeds one exchange to the controller and decodes the body if usable
fn observe<T>(
    rate: &Mutex<RateAdaptiveController>,
    exchange: Exchange,
    parse: impl FnOnce(&str) -> Result<T, CrawlError>,
) -> (RecommendedAction, Result<T, CrawlError>) {
    let mut rate = lock_rate(rate);
    match exchange.outcome {
        Ok(snapshot) => {
            let analysis = rate.analyze_response(&snapshot, exchange.elapsed);
            let result = match snapshot.error_for_status() {
                Some(err) => Err(err),
                None => parse(&snapshot.body),
            };
            (analysis.recommended_action, result)
        }
        Err(err) => {
            let analysis = rate.analyze_error(&err, exchange.elapsed);
            (analysis.recommended_action, Err(err))
        }
    }
}

/// Sleeps for the controller's delay scaled by `factor`
///
/// Returns early once the stop flag is cleared.
async fn pace(rate: &Mutex<RateAdaptiveController>, running: &AtomicBool, factor: f64) {
    let delay = lock_rate(rate).current_delay().mul_f64(factor);
    let until = Instant::now() + delay;

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= until {
            break;
        }
        tokio::time::sleep((until - now).min(PAUSE_SLICE)).await;
    }
}

impl CrawlPipeline {
    /// Creates a pipeline for one category
    ///
    /// # Arguments
    ///
    /// * `category` - The category to crawl
    /// * `config` - Batch sizes, limits and pacing factors
    /// * `context` - Injected client, stores, controller, stop flag and counters
    pub fn new(category: impl Into<String>, config: CrawlerConfig, context: PipelineContext) -> Self {
        Self {
            category: category.into(),
            config,
            client: context.client,
            store: context.store,
            progress: context.progress,
            rate: context.rate,
            running: context.running,
            counters: context.counters,
            config_hash: None,
            known: None,
            detail_queue: VecDeque::new(),
            sub_record_queue: VecDeque::new(),
            deadline: None,
        }
    }

    /// Records the configuration hash in session stats
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn counters(&self) -> &Arc<CrawlCounters> {
        &self.counters
    }

    /// Number of items waiting for detail fetch
    pub fn queued_details(&self) -> usize {
        self.detail_queue.len()
    }

    /// Zeroes the cumulative counters
    pub fn reset_counters(&self) {
        self.counters.reset();
    }

    /// Runs all three phases once
    ///
    /// The outcome is written to the progress store: completed sessions mark
    /// the category completed, failed ones mark it as errored, and stopped or
    /// paused ones leave the cursor for the next session. Queues and the id
    /// cache are always released.
    ///
    /// # Returns
    ///
    /// * `Ok(SessionOutcome)` - How the session ended
    /// * `Err(HarvestError)` - The controller escalated or the store failed
    pub async fn run_session(&mut self) -> Result<SessionOutcome, HarvestError> {
        let started_at = Utc::now();
        let before = self.counters.snapshot();
        self.deadline = Some(Instant::now() + self.config.max_session_duration());

        tracing::info!("Starting crawl session for '{}'", self.category);
        let result = self.run_phases().await;

        let delta = self.counters.snapshot().since(&before);
        let stats = SessionStats {
            category: self.category.clone(),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            pages: delta.pages,
            new_items: delta.new_items,
            updated_items: delta.updated_items,
            skipped_duplicates: delta.skipped_duplicates,
            duplicate_writes: delta.duplicate_writes,
            sub_records: delta.sub_records,
            errors: delta.errors,
            outcome: match &result {
                Ok(outcome) => outcome.as_str().to_string(),
                Err(_) => "error".to_string(),
            },
            config_hash: self.config_hash.clone(),
        };

        match &result {
            Ok(SessionOutcome::Completed) => {
                self.progress.mark_completed(&self.category, stats.clone());
            }
            Ok(outcome) => {
                tracing::info!(
                    "Session for '{}' {}; cursor kept for the next run",
                    self.category,
                    outcome.as_str()
                );
            }
            Err(e) => {
                tracing::error!("Session for '{}' failed: {}", self.category, e);
                self.progress.mark_error(&self.category, &e.to_string());
            }
        }
        self.progress.save_session_stats(&stats);
        self.clear_session();

        tracing::info!(
            category = %self.category,
            pages = stats.pages,
            new_items = stats.new_items,
            updated_items = stats.updated_items,
            skipped = stats.skipped_duplicates,
            sub_records = stats.sub_records,
            errors = stats.errors,
            "Session finished: {}",
            stats.outcome
        );

        result
    }

    async fn run_phases(&mut self) -> Result<SessionOutcome, HarvestError> {
        let summary = self.run_enumeration().await?;
        if summary.end == EnumerationEnd::Stopped {
            return Ok(SessionOutcome::Stopped);
        }

        if let Some(halt) = self.process_details().await? {
            return Ok(halt_outcome(halt));
        }
        if let Some(halt) = self.process_sub_records().await? {
            return Ok(halt_outcome(halt));
        }

        Ok(match summary.end {
            EnumerationEnd::Exhausted => SessionOutcome::Completed,
            EnumerationEnd::Stopped => SessionOutcome::Stopped,
            EnumerationEnd::Deadline | EnumerationEnd::PageLimit | EnumerationEnd::QueueFull => {
                SessionOutcome::Paused
            }
        })
    }

    /// Phase 1: walks listing pages from the stored cursor
    pub async fn run_enumeration(&mut self) -> Result<EnumerationSummary, HarvestError> {
        if self.known.is_none() {
            self.known = Some(ExistingIdCache::load(self.store.as_ref())?);
        }

        let cursor = self.progress.get_progress(&self.category);
        let mut page = cursor.resume_page();
        let mut total = if page == 1 { 0 } else { cursor.total_processed };
        // Also flips the status to running
        self.progress.save_progress(&self.category, page, total);

        if page > 1 {
            tracing::info!("Resuming '{}' at page {}", self.category, page);
        }

        let mut summary = EnumerationSummary {
            pages: 0,
            queued: 0,
            skipped: 0,
            failed_pages: 0,
            end: EnumerationEnd::Exhausted,
        };
        let mut empty_streak = 0;

        loop {
            if let Some(end) = self.enumeration_limit(summary.pages) {
                summary.end = end;
                break;
            }

            let items = match self.fetch_listing_page(page).await? {
                Some(items) => items,
                None if !self.running.load(Ordering::Relaxed) => {
                    summary.end = EnumerationEnd::Stopped;
                    break;
                }
                None => {
                    summary.failed_pages += 1;
                    summary.pages += 1;
                    page += 1;
                    self.progress.save_progress(&self.category, page, total);
                    pace(&self.rate, &self.running, 1.0).await;
                    continue;
                }
            };

            summary.pages += 1;
            CrawlCounters::add(&self.counters.pages, 1);

            if items.is_empty() {
                empty_streak += 1;
            } else {
                empty_streak = 0;
            }

            let (queued, skipped) = self.enqueue(&items);
            summary.queued += queued;
            summary.skipped += skipped;

            total += items.len() as u64;
            page += 1;
            self.progress.save_progress(&self.category, page, total);

            tracing::info!(
                "[{}] page {}: {} items, {} queued, {} skipped",
                self.category,
                page - 1,
                items.len(),
                queued,
                skipped
            );

            if empty_streak >= self.config.max_empty_pages {
                tracing::info!(
                    "[{}] {} consecutive empty pages, listing exhausted",
                    self.category,
                    empty_streak
                );
                summary.end = EnumerationEnd::Exhausted;
                break;
            }

            pace(&self.rate, &self.running, 1.0).await;
        }

        Ok(summary)
    }

    fn enumeration_limit(&self, pages_this_session: u32) -> Option<EnumerationEnd> {
        match self.halt() {
            Some(Halt::Stopped) => return Some(EnumerationEnd::Stopped),
            Some(Halt::Deadline) => return Some(EnumerationEnd::Deadline),
            None => {}
        }
        if self
            .config
            .max_pages
            .is_some_and(|max| pages_this_session >= max)
        {
            return Some(EnumerationEnd::PageLimit);
        }
        if self.detail_queue.len() >= self.config.queue_limit {
            tracing::warn!(
                "[{}] queue limit of {} reached",
                self.category,
                self.config.queue_limit
            );
            return Some(EnumerationEnd::QueueFull);
        }
        None
    }

    fn enqueue(&mut self, items: &[CatalogItemRef]) -> (usize, usize) {
        let mut queued = 0;
        let mut skipped = 0;
        let Some(known) = self.known.as_mut() else {
            return (0, 0);
        };

        for item in items {
            match known.classify(item) {
                Freshness::New | Freshness::Updated => {
                    self.detail_queue.push_back(item.clone());
                    queued += 1;
                }
                Freshness::Duplicate => skipped += 1,
            }
        }

        CrawlCounters::add(&self.counters.skipped_duplicates, skipped as u64);
        (queued, skipped)
    }

    /// Fetches one listing page, retrying transient failures in place
    ///
    /// Returns `None` once the attempts are used up; the failure has then
    /// been logged to the progress store.
    async fn fetch_listing_page(
        &mut self,
        page: u32,
    ) -> Result<Option<Vec<CatalogItemRef>>, HarvestError> {
        let attempts = self.config.page_attempts.max(1);
        let context = format!("{} page {}", self.category, page);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                pace(&self.rate, &self.running, 1.0).await;
                if self.halt() == Some(Halt::Stopped) {
                    return Ok(None);
                }
            }

            let exchange = self.client.fetch_listing(&self.category, page).await;
            let (action, result) = observe(&self.rate, exchange, |body| {
                parse_listing(body, &context)
            });

            if action == RecommendedAction::PauseAndRetry {
                let reason = match &result {
                    Err(e) => format!("error storm at page {}: {}", page, e),
                    Ok(_) => format!("error storm at page {}", page),
                };
                return Err(self.escalate(reason));
            }

            match result {
                Ok(items) => return Ok(Some(items)),
                Err(e) => {
                    tracing::warn!(
                        "[{}] page {} attempt {}/{} failed: {}",
                        self.category,
                        page,
                        attempt,
                        attempts,
                        e
                    );
                    let transient = e.is_transient();
                    last_error = Some(e);
                    if !transient {
                        break;
                    }
                }
            }
        }

        if let Some(e) = last_error {
            self.progress.log_error(&self.category, page, &e);
            CrawlCounters::add(&self.counters.errors, 1);
        }
        Ok(None)
    }

    /// Phase 2: drains the detail queue in batches
    async fn process_details(&mut self) -> Result<Option<Halt>, HarvestError> {
        let batch_size = self.config.batch_size.max(1);
        let mut batch_number = 0;

        while !self.detail_queue.is_empty() {
            if let Some(halt) = self.halt() {
                return Ok(Some(halt));
            }
            batch_number += 1;

            let take = batch_size.min(self.detail_queue.len());
            let batch: Vec<CatalogItemRef> = self.detail_queue.drain(..take).collect();
            let mut records = Vec::with_capacity(batch.len());

            for (i, item) in batch.iter().enumerate() {
                if i > 0 {
                    pace(&self.rate, &self.running, self.config.detail_delay_factor).await;
                }
                if let Some((record, groups)) = self.fetch_detail(item).await? {
                    if !groups.is_empty() {
                        self.sub_record_queue.push_back(PendingSubRecords {
                            parent_slug: record.slug.clone(),
                            groups,
                        });
                    }
                    records.push(record);
                }
            }

            if !records.is_empty() {
                let outcome = self.store.bulk_upsert_records(&records)?;
                CrawlCounters::add(&self.counters.new_items, outcome.inserted as u64);
                CrawlCounters::add(&self.counters.updated_items, outcome.updated as u64);
                CrawlCounters::add(&self.counters.duplicate_writes, outcome.duplicates as u64);
                CrawlCounters::add(&self.counters.errors, outcome.failed as u64);

                tracing::info!(
                    "[{}] detail batch {}: {} inserted, {} updated, {} duplicates, {} failed",
                    self.category,
                    batch_number,
                    outcome.inserted,
                    outcome.updated,
                    outcome.duplicates,
                    outcome.failed
                );
            }

            if !self.detail_queue.is_empty() {
                pace(&self.rate, &self.running, 1.0).await;
            }
        }

        Ok(None)
    }

    async fn fetch_detail(
        &mut self,
        item: &CatalogItemRef,
    ) -> Result<Option<(CatalogRecord, Vec<SubRecordGroup>)>, HarvestError> {
        let attempts = self.config.page_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                pace(&self.rate, &self.running, self.config.detail_delay_factor).await;
                if self.halt() == Some(Halt::Stopped) {
                    return Ok(None);
                }
            }

            let exchange = self.client.fetch_detail(&item.slug).await;
            let (action, result) = observe(&self.rate, exchange, |body| {
                parse_detail(body, &item.slug)?.into_record(&self.category, &item.slug)
            });

            if action == RecommendedAction::PauseAndRetry {
                return Err(self.escalate(format!("error storm at item '{}'", item.slug)));
            }

            match result {
                Ok(parts) => return Ok(Some(parts)),
                Err(e) => {
                    tracing::warn!("[{}] item '{}' failed: {}", self.category, item.slug, e);
                    let transient = e.is_transient();
                    last_error = Some(e);
                    if !transient {
                        break;
                    }
                }
            }
        }

        if let Some(e) = last_error {
            self.progress.log_item_error(&self.category, &item.slug, &e);
            CrawlCounters::add(&self.counters.errors, 1);
        }
        Ok(None)
    }

    /// Phase 3: drains the sub-record queue in batches of parents
    async fn process_sub_records(&mut self) -> Result<Option<Halt>, HarvestError> {
        let batch_size = self.config.sub_record_batch_size.max(1);

        while !self.sub_record_queue.is_empty() {
            if let Some(halt) = self.halt() {
                return Ok(Some(halt));
            }

            let take = batch_size.min(self.sub_record_queue.len());
            let batch: Vec<PendingSubRecords> = self.sub_record_queue.drain(..take).collect();
            let mut rows = Vec::new();

            for pending in batch {
                let Some(parent_id) = self.store.find_record_id(&pending.parent_slug)? else {
                    tracing::debug!(
                        "[{}] parent '{}' was not stored, skipping its sub-records",
                        self.category,
                        pending.parent_slug
                    );
                    continue;
                };

                let flat = flatten_sub_records(&pending.groups);
                let fetched = self.fetch_sub_record_contents(&pending.parent_slug, flat).await?;

                rows.extend(fetched.into_iter().map(|(entry, content)| SubRecord {
                    parent_id,
                    sequence: entry.sequence,
                    slug: entry.slug,
                    name: entry.name,
                    title: entry.title,
                    group_name: entry.group_name,
                    source_url: entry.api_url,
                    content,
                }));
            }

            if !rows.is_empty() {
                let outcome = self.store.bulk_upsert_sub_records(&rows)?;
                CrawlCounters::add(&self.counters.sub_records, outcome.committed() as u64);
                CrawlCounters::add(&self.counters.duplicate_writes, outcome.duplicates as u64);
                CrawlCounters::add(&self.counters.errors, outcome.failed as u64);

                tracing::info!(
                    "[{}] sub-record batch: {} written, {} duplicates, {} failed",
                    self.category,
                    outcome.committed(),
                    outcome.duplicates,
                    outcome.failed
                );
            }
        }

        Ok(None)
    }

    /// Fetches sub-record details with bounded concurrency, in list order
    async fn fetch_sub_record_contents(
        &mut self,
        parent_slug: &str,
        flat: Vec<FlatSubRecord>,
    ) -> Result<Vec<(FlatSubRecord, Option<String>)>, HarvestError> {
        if !self.config.fetch_sub_record_details {
            return Ok(flat.into_iter().map(|entry| (entry, None)).collect());
        }

        let client = &self.client;
        let rate = self.rate.as_ref();
        let running = self.running.as_ref();
        let factor = self.config.detail_delay_factor;
        // Set by the first storm verdict; entries not yet sent are dropped
        let escalated = AtomicBool::new(false);
        let escalated = &escalated;

        let results: Vec<Option<(FlatSubRecord, Result<String, CrawlError>)>> =
            stream::iter(flat.into_iter().map(move |entry| async move {
                if escalated.load(Ordering::Relaxed) {
                    return None;
                }
                if !running.load(Ordering::Relaxed) {
                    let err = CrawlError::Unknown {
                        url: entry.slug.clone(),
                        message: "stopped before fetch".to_string(),
                    };
                    return Some((entry, Err(err)));
                }
                pace(rate, running, factor).await;
                if escalated.load(Ordering::Relaxed) {
                    return None;
                }

                let exchange = client
                    .fetch_sub_record(parent_slug, &entry.slug, entry.api_url.as_deref())
                    .await;
                let context = format!("{}/{}", parent_slug, entry.slug);
                let (action, result) =
                    observe(rate, exchange, |body| sub_record_content(body, &context));
                if action == RecommendedAction::PauseAndRetry {
                    escalated.store(true, Ordering::Relaxed);
                }
                Some((entry, result))
            }))
            .buffered(self.config.sub_record_concurrency.max(1))
            .collect()
            .await;

        let mut contents = Vec::with_capacity(results.len());
        for (entry, result) in results.into_iter().flatten() {
            let content = match result {
                Ok(content) => Some(content),
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        let item = format!("{}/{}", parent_slug, entry.slug);
                        self.progress.log_item_error(&self.category, &item, &e);
                        CrawlCounters::add(&self.counters.errors, 1);
                    }
                    None
                }
            };
            contents.push((entry, content));
        }

        if escalated.load(Ordering::Relaxed) {
            return Err(self.escalate(format!(
                "error storm in sub-records of '{}'",
                parent_slug
            )));
        }
        Ok(contents)
    }

    fn halt(&self) -> Option<Halt> {
        if !self.running.load(Ordering::Relaxed) {
            return Some(Halt::Stopped);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Halt::Deadline),
            _ => None,
        }
    }

    fn escalate(&self, reason: String) -> HarvestError {
        let errors = lock_rate(&self.rate).state().consecutive_errors;
        tracing::error!(
            "[{}] escalating after {} consecutive errors: {}",
            self.category,
            errors,
            reason
        );
        HarvestError::Escalated {
            category: self.category.clone(),
            reason,
        }
    }

    fn clear_session(&mut self) {
        self.detail_queue.clear();
        self.detail_queue.shrink_to_fit();
        self.sub_record_queue.clear();
        self.sub_record_queue.shrink_to_fit();
        if let Some(known) = self.known.as_mut() {
            known.clear();
        }
        self.known = None;
        self.deadline = None;
    }
}

fn halt_outcome(halt: Halt) -> SessionOutcome {
    match halt {
        Halt::Stopped => SessionOutcome::Stopped,
        Halt::Deadline => SessionOutcome::Paused,
    }
}
