//! Activity-gated background processing.
//!
//! A single worker wakes every `interval_seconds`, skips the cycle when
//! the user is actively chatting, and otherwise runs: entity extraction
//! for pending events, then summary refresh and learning decay on their
//! own schedules. Sub-cycles fire off next-due timestamps, so a slow
//! cycle can never skip a window.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::embeddings::Embedder;
use crate::extraction::Extractor;
use crate::learning::LearningManager;
use crate::models::ExtractionStatus;
use crate::store::MemoryStore;
use crate::summaries::SummaryTreeManager;

/// Seconds between summary refresh passes.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(300);
/// Seconds between learning decay passes.
const DECAY_INTERVAL: Duration = Duration::from_secs(3600);

// ─────────────────────────────────────────────
// ActivityTracker
// ─────────────────────────────────────────────

/// Tracks user chat activity so background work never competes with an
/// active conversation.
pub struct ActivityTracker {
    quiet_threshold: Duration,
    last_activity: Mutex<Option<Instant>>,
}

impl ActivityTracker {
    pub fn new(quiet_threshold_seconds: u64) -> Self {
        ActivityTracker {
            quiet_threshold: Duration::from_secs(quiet_threshold_seconds),
            last_activity: Mutex::new(None),
        }
    }

    /// Call when the user sends a message.
    pub fn mark_activity(&self) {
        *self.last_activity.lock().unwrap() = Some(Instant::now());
    }

    /// Whether the user was active within the quiet threshold.
    pub fn is_user_active(&self) -> bool {
        self.last_activity
            .lock()
            .unwrap()
            .map_or(false, |last| last.elapsed() < self.quiet_threshold)
    }

    /// Seconds since the last user message, or infinity if none yet.
    pub fn seconds_since_last_activity(&self) -> f64 {
        self.last_activity
            .lock()
            .unwrap()
            .map_or(f64::INFINITY, |last| last.elapsed().as_secs_f64())
    }
}

// ─────────────────────────────────────────────
// BackgroundProcessor
// ─────────────────────────────────────────────

/// What one cycle accomplished.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub skipped_active: bool,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub summaries_refreshed: usize,
    pub learnings_decayed: usize,
    pub learnings_removed: usize,
}

/// Single background worker for extraction, summaries, and decay.
pub struct BackgroundProcessor {
    store: Arc<MemoryStore>,
    activity: Arc<ActivityTracker>,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn Embedder>,

    interval: Duration,
    extraction_batch: usize,
    summary_staleness: i64,
    summary_batch: usize,
    decay_rate: f64,

    summary_interval: Duration,
    decay_interval: Duration,

    /// Next-due timestamps for the sub-cycles.
    next_summary: Mutex<Instant>,
    next_decay: Mutex<Instant>,

    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackgroundProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        activity: Arc<ActivityTracker>,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn Embedder>,
        interval_seconds: u64,
        extraction_batch: usize,
        summary_staleness: i64,
        summary_batch: usize,
        decay_rate: f64,
    ) -> Self {
        let now = Instant::now();
        BackgroundProcessor {
            store,
            activity,
            extractor,
            embedder,
            interval: Duration::from_secs(interval_seconds),
            extraction_batch,
            summary_staleness,
            summary_batch,
            decay_rate,
            summary_interval: SUMMARY_INTERVAL,
            decay_interval: DECAY_INTERVAL,
            next_summary: Mutex::new(now),
            next_decay: Mutex::new(now),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the sub-cycle cadence (tests).
    pub fn with_subcycle_intervals(mut self, summary: Duration, decay: Duration) -> Self {
        self.summary_interval = summary;
        self.decay_interval = decay;
        self
    }

    /// Start the worker loop.
    pub async fn start(self: &Arc<Self>) {
        let processor = self.clone();
        let handle = tokio::spawn(async move {
            processor.run_loop().await;
        });
        *self.task.lock().await = Some(handle);
        info!(interval = ?self.interval, "background processor started");
    }

    /// Stop the worker: the in-flight cycle finishes, then the loop exits.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("background processor stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let report = self.run_cycle().await;
            if !report.skipped_active
                && (report.extracted > 0
                    || report.summaries_refreshed > 0
                    || report.learnings_decayed + report.learnings_removed > 0)
            {
                info!(
                    extracted = report.extracted,
                    summaries = report.summaries_refreshed,
                    decayed = report.learnings_decayed,
                    removed = report.learnings_removed,
                    "background cycle"
                );
            }
        }
    }

    /// Run one processing cycle. Errors in any step are logged and the
    /// cycle continues.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        if self.activity.is_user_active() {
            debug!("user active, skipping background cycle");
            report.skipped_active = true;
            return report;
        }

        self.extract_pending(&mut report).await;

        let now = Instant::now();
        let summaries_due = {
            let mut next = self.next_summary.lock().unwrap();
            if now >= *next {
                *next = now + self.summary_interval;
                true
            } else {
                false
            }
        };
        if summaries_due {
            match SummaryTreeManager::new(&self.store, self.summary_staleness, self.summary_batch)
                .refresh_all_stale()
            {
                Ok(stats) => report.summaries_refreshed = stats.refreshed,
                Err(e) => error!(error = %e, "summary refresh failed"),
            }
        }

        let decay_due = {
            let mut next = self.next_decay.lock().unwrap();
            if now >= *next {
                *next = now + self.decay_interval;
                true
            } else {
                false
            }
        };
        if decay_due {
            match LearningManager::new(&self.store, self.decay_rate).apply_decay() {
                Ok(stats) => {
                    report.learnings_decayed = stats.decayed;
                    report.learnings_removed = stats.removed;
                }
                Err(e) => error!(error = %e, "learning decay failed"),
            }
        }

        report
    }

    /// Pull pending events, extract, and upsert the results.
    async fn extract_pending(&self, report: &mut CycleReport) {
        let pending = match self.store.get_pending_events(self.extraction_batch) {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "failed to load pending events");
                return;
            }
        };

        for event in pending {
            match self.extractor.extract(&event).await {
                Ok(result) => {
                    if let Err(e) = self.apply_extraction(&event.id, result) {
                        error!(event = %event.id, error = %e, "failed to apply extraction");
                        let _ = self
                            .store
                            .mark_event_extracted(&event.id, ExtractionStatus::Failed);
                        report.extraction_failures += 1;
                        continue;
                    }
                    let _ = self
                        .store
                        .mark_event_extracted(&event.id, ExtractionStatus::Complete);
                    report.extracted += 1;
                }
                Err(e) => {
                    error!(event = %event.id, error = %e, "extraction failed");
                    let _ = self
                        .store
                        .mark_event_extracted(&event.id, ExtractionStatus::Failed);
                    report.extraction_failures += 1;
                }
            }
        }
    }

    /// Upsert extracted entities by name, then save edges and facts.
    fn apply_extraction(
        &self,
        event_id: &str,
        result: crate::extraction::ExtractionResult,
    ) -> anyhow::Result<()> {
        for mut entity in result.entities {
            match self.store.find_entity_by_name(&entity.name)? {
                Some(mut existing) => {
                    for alias in &entity.aliases {
                        if !existing.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
                            existing.aliases.push(alias.clone());
                        }
                    }
                    if !existing.source_event_ids.iter().any(|id| id == event_id) {
                        existing.source_event_ids.push(event_id.to_string());
                    }
                    existing.event_count += 1;
                    existing.last_seen = entity.last_seen;
                    self.store.update_entity(&existing)?;
                }
                None => {
                    if entity.name_embedding.is_none() {
                        entity.name_embedding = Some(self.embedder.embed(&entity.name));
                    }
                    self.store.save_entity(&entity)?;
                }
            }
        }

        for edge in result.edges {
            self.store.save_edge(&edge)?;
        }
        for fact in result.facts {
            self.store.save_fact(&fact)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
