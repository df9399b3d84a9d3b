//! Session orchestrator.
//!
//! Drives one download session: list the catalog, walk the items one at a
//! time, record every outcome in the progress store and pace the fetches
//! with the delay scheduler. Every terminal state appends a session to the
//! history before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Catalog, FetchError, FetchOptions, FetchOutput, Fetcher};
use crate::domain::{session_id_for, AttemptOutcome, ItemFilter, MediaItem, Session, SessionOutcome};

use super::progress_store::ProgressStore;
use super::retry::{classify, Disposition};
use super::scheduler::{Admission, Clock, DelayScheduler, QuotaCheck, SystemClock};
use super::stats::{SessionStats, SessionSummary};

/// Channel label used for sessions driven by `retry_failed`
pub const RETRY_CHANNEL: &str = "retry-failed";

/// Exit status for interrupted sessions
pub const EXIT_INTERRUPTED: u8 = 130;

/// Caller-supplied session options
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Attempts allowed per item across sessions
    pub max_retries: u32,

    /// Cap on the number of listed items considered
    pub limit: Option<usize>,

    pub filter: ItemFilter,

    /// Output root; channel sessions fetch into `<destination>/<channel id>`
    pub destination: PathBuf,

    pub fetch_options: FetchOptions,
}

impl SessionOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            max_retries: 3,
            limit: None,
            filter: ItemFilter::default(),
            destination: destination.into(),
            fetch_options: FetchOptions::default(),
        }
    }
}

/// Where a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    FetchingList,
    Downloading,
    Waiting,
    Completed,
    Stopped,
    QuotaExhausted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::QuotaExhausted)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Stopped) => true,
            (Idle, FetchingList) | (Idle, QuotaExhausted) | (Idle, Downloading) => true,
            (FetchingList, Downloading) | (FetchingList, Completed) => true,
            (FetchingList, QuotaExhausted) => true,
            (Downloading, Waiting) | (Downloading, Completed) | (Downloading, QuotaExhausted) => {
                true
            }
            (Waiting, Downloading) => true,
            _ => false,
        }
    }

    fn outcome(self) -> Option<SessionOutcome> {
        match self {
            Self::Completed => Some(SessionOutcome::Completed),
            Self::Stopped => Some(SessionOutcome::Stopped),
            Self::QuotaExhausted => Some(SessionOutcome::QuotaExhausted),
            _ => None,
        }
    }
}

/// What a finished session hands back to the caller
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub summary: SessionSummary,
}

impl SessionReport {
    pub fn outcome(&self) -> SessionOutcome {
        self.session.outcome
    }

    /// 0 clean, 1 with failures, 130 interrupted
    pub fn exit_code(&self) -> u8 {
        match self.session.outcome {
            SessionOutcome::Stopped => EXIT_INTERRUPTED,
            _ if self.session.failed > 0 => 1,
            _ => 0,
        }
    }
}

/// Drives download sessions against one progress store
pub struct SessionOrchestrator {
    store: ProgressStore,
    scheduler: DelayScheduler,
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    options: SessionOptions,
    state: SessionState,
    /// Where the current session's files go
    fetch_dir: PathBuf,
}

impl SessionOrchestrator {
    pub fn new(
        store: ProgressStore,
        scheduler: DelayScheduler,
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn Fetcher>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            scheduler,
            catalog,
            fetcher,
            clock: Arc::new(SystemClock),
            rng: StdRng::from_entropy(),
            fetch_dir: options.destination.clone(),
            options,
            state: SessionState::Idle,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random source used for pacing and shuffling
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Release the store (and its lock)
    pub fn into_store(self) -> ProgressStore {
        self.store
    }

    /// Download everything eligible from `source`
    #[instrument(skip(self, cancel), fields(profile = %self.scheduler.profile().name))]
    pub async fn run(&mut self, source: &str, cancel: &CancellationToken) -> Result<SessionReport> {
        let mut stats = self.begin(source);

        let remaining = match self.quota_remaining() {
            Some(remaining) => remaining,
            None => {
                info!("Daily quota already reached, not listing");
                self.transition(SessionState::QuotaExhausted);
                return self.finish(stats);
            }
        };

        if cancel.is_cancelled() {
            self.transition(SessionState::Stopped);
            return self.finish(stats);
        }

        self.transition(SessionState::FetchingList);
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            listed = self.catalog.list_items(source, &self.options.filter) => Some(listed),
        };
        let items = match listed {
            None => {
                info!("Cancelled while listing");
                self.transition(SessionState::Stopped);
                return self.finish(stats);
            }
            Some(Ok(items)) => items,
            Some(Err(e)) => {
                warn!(catalog = self.catalog.name(), error = %e, "Could not list items");
                Vec::new()
            }
        };

        if items.is_empty() {
            info!("No items found");
            self.transition(SessionState::Completed);
            return self.finish(stats);
        }

        info!(count = items.len(), "Listed items");
        let (items, deferred) = self.prepare(items, remaining, &mut stats);

        let now = self.clock.now().with_timezone(&Utc);
        let channel_id = self
            .store
            .record_channel(source, stats.total as usize, &stats.session_id, now)
            .context("Failed to record channel state")?;
        debug!(channel = %channel_id, "Recorded channel");
        self.fetch_dir = self.options.destination.join(&channel_id);

        self.drive(items, deferred, &mut stats, cancel).await
    }

    /// Re-attempt failed items that still have attempts left
    #[instrument(skip(self, cancel))]
    pub async fn retry_failed(&mut self, cancel: &CancellationToken) -> Result<SessionReport> {
        let mut stats = self.begin(RETRY_CHANNEL);
        self.fetch_dir = self.options.destination.clone();

        let remaining = match self.quota_remaining() {
            Some(remaining) => remaining,
            None => {
                info!("Daily quota already reached");
                self.transition(SessionState::QuotaExhausted);
                return self.finish(stats);
            }
        };

        let items: Vec<MediaItem> = self
            .store
            .retryable(self.options.max_retries)
            .iter()
            .map(|record| record.to_media_item())
            .collect();

        if items.is_empty() {
            info!("Nothing to retry");
            self.transition(SessionState::Downloading);
            self.transition(SessionState::Completed);
            return self.finish(stats);
        }

        info!(count = items.len(), "Retrying failed items");
        let (items, deferred) = self.prepare(items, remaining, &mut stats);
        self.drive(items, deferred, &mut stats, cancel).await
    }

    fn begin(&mut self, channel: &str) -> SessionStats {
        self.state = SessionState::Idle;
        let started_at = self.clock.now().with_timezone(&Utc);
        let session_id = session_id_for(started_at);
        info!(session = %session_id, channel, "Session started");
        SessionStats::new(session_id, channel, started_at)
    }

    fn quota_remaining(&self) -> Option<u32> {
        let today = self.clock.now().date_naive();
        match self.scheduler.check_daily_quota(self.store.downloads_on(today)) {
            QuotaCheck::Admit { remaining } => Some(remaining),
            QuotaCheck::QuotaExceeded => None,
        }
    }

    /// Limit, shuffle, then cut to the remaining quota. Also returns how
    /// many eligible items the quota deferred.
    fn prepare(
        &mut self,
        mut items: Vec<MediaItem>,
        remaining: u32,
        stats: &mut SessionStats,
    ) -> (Vec<MediaItem>, u32) {
        if let Some(limit) = self.options.limit {
            items.truncate(limit);
        }

        if self.scheduler.profile().shuffle {
            items.shuffle(&mut self.rng);
            debug!("Shuffled item order");
        }

        stats.total = items.len() as u32;

        let max_retries = self.options.max_retries;
        let store = &self.store;
        let (items, cut) =
            truncate_to_quota(items, remaining, |item| store.is_eligible(&item.id, max_retries));
        if cut > 0 {
            info!(cut, remaining, "Deferring items beyond today's quota");
            stats.record_skips(cut);
        }
        (items, cut)
    }

    async fn drive(
        &mut self,
        items: Vec<MediaItem>,
        deferred: u32,
        stats: &mut SessionStats,
        cancel: &CancellationToken,
    ) -> Result<SessionReport> {
        self.transition(SessionState::Downloading);

        match self.process(&items, stats, cancel).await {
            Ok(state) => {
                // Items were held back for tomorrow
                let state = match state {
                    SessionState::Completed if deferred > 0 => SessionState::QuotaExhausted,
                    other => other,
                };
                self.transition(state);
                self.finish(stats.clone())
            }
            Err(e) => {
                self.transition(SessionState::Stopped);
                if let Err(persist) = self.finish(stats.clone()) {
                    warn!(error = %persist, "Could not persist session after store failure");
                }
                Err(e)
            }
        }
    }

    async fn process(
        &mut self,
        items: &[MediaItem],
        stats: &mut SessionStats,
        cancel: &CancellationToken,
    ) -> Result<SessionState> {
        let max_retries = self.options.max_retries;
        let mut fetched_any = false;
        let mut cooldown: Option<Duration> = None;
        let mut warned_hours = false;

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancelled between items");
                return Ok(SessionState::Stopped);
            }

            if !self.store.is_eligible(&item.id, max_retries) {
                debug!(id = %item.id, "Skipping item");
                stats.record_skip();
                continue;
            }

            if fetched_any {
                let mut delay = self.scheduler.next_delay(stats.downloaded, &mut self.rng);
                if let Some(extra) = cooldown.take() {
                    delay += extra;
                }
                self.transition(SessionState::Waiting);
                info!(delay_secs = delay.as_secs(), "Waiting before next download");
                if !sleep_or_cancel(delay, cancel).await {
                    info!("Cancelled while waiting");
                    return Ok(SessionState::Stopped);
                }
                self.transition(SessionState::Downloading);
            }

            let now = self.clock.now();
            match self.scheduler.check_admission(now.time()) {
                Admission::Admit => {}
                Admission::Reject => {
                    warn!(hour = %now.format("%H:%M"), "Inside night hours, stopping");
                    return Ok(SessionState::Stopped);
                }
                Admission::DeferUntilWorkHours if self.scheduler.profile().strict_hours => {
                    warn!(hour = %now.format("%H:%M"), "Outside work hours, stopping");
                    return Ok(SessionState::Stopped);
                }
                Admission::DeferUntilWorkHours => {
                    if !warned_hours {
                        warn!(hour = %now.format("%H:%M"), "Outside typical work hours");
                        warned_hours = true;
                    }
                }
            }

            if let QuotaCheck::QuotaExceeded = self
                .scheduler
                .check_daily_quota(self.store.downloads_on(now.date_naive()))
            {
                info!("Daily quota reached");
                return Ok(SessionState::QuotaExhausted);
            }

            if let Some(pause) = self.scheduler.hesitation(&mut self.rng) {
                debug!(pause_secs = pause.as_secs(), "Hesitating before download");
                if !sleep_or_cancel(pause, cancel).await {
                    info!("Cancelled before download");
                    return Ok(SessionState::Stopped);
                }
            }

            info!(
                id = %item.id,
                title = %item.short_title(),
                position = idx + 1,
                of = items.len(),
                "Downloading"
            );
            self.store
                .begin_attempt(item, &stats.session_id, now.with_timezone(&Utc))
                .context("Failed to persist pending record")?;
            fetched_any = true;

            let result = match self.fetch(item, cancel).await {
                Some(result) => result,
                None => {
                    info!(id = %item.id, "Cancelled during fetch");
                    return Ok(SessionState::Stopped);
                }
            };

            let now = self.clock.now();
            match result {
                Ok(output) => {
                    self.store
                        .record_attempt(item, AttemptOutcome::Downloaded, None, &stats.session_id, now)
                        .context("Failed to record download")?;
                    stats.record_download(output.bytes);
                    info!(id = %item.id, bytes = ?output.bytes, "Downloaded");
                }
                Err(e) => {
                    let disposition = classify(&e);
                    let record = self
                        .store
                        .record_attempt(
                            item,
                            disposition.into(),
                            Some(&e.message),
                            &stats.session_id,
                            now,
                        )
                        .context("Failed to record failure")?;
                    stats.record_failure();
                    match disposition {
                        Disposition::Permanent => {
                            warn!(id = %item.id, error = %e.message, "Permanent failure, not retrying");
                        }
                        Disposition::Transient => {
                            warn!(
                                id = %item.id,
                                attempts = record.attempts,
                                max_retries,
                                error = %e.message,
                                "Transient failure"
                            );
                            cooldown = self.scheduler.failure_cooldown(&mut self.rng);
                        }
                    }
                }
            }
        }

        Ok(SessionState::Completed)
    }

    /// Run the fetch in its own task. `None` means cancelled.
    async fn fetch(
        &self,
        item: &MediaItem,
        cancel: &CancellationToken,
    ) -> Option<Result<FetchOutput, FetchError>> {
        let fetcher = Arc::clone(&self.fetcher);
        let owned = item.clone();
        let destination = self.fetch_dir.clone();
        let options = self.options.fetch_options.clone();

        let handle =
            tokio::spawn(async move { fetcher.fetch(&owned, &destination, &options).await });
        let abort = handle.abort_handle();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                None
            }
            joined = handle => Some(match joined {
                Ok(result) => result,
                Err(e) => Err(FetchError::unknown(format!("fetch task failed: {}", e))),
            }),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "Unexpected session transition");
        }
        debug!(from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    fn finish(&mut self, stats: SessionStats) -> Result<SessionReport> {
        let outcome = self.state.outcome().unwrap_or(SessionOutcome::Stopped);
        let ended_at = self.clock.now().with_timezone(&Utc);
        let session = stats.into_session(outcome, ended_at);

        self.store
            .append_session(session.clone())
            .context("Failed to append session")?;

        info!(
            session = %session.id,
            %outcome,
            downloaded = session.downloaded,
            failed = session.failed,
            skipped = session.skipped,
            "Session finished"
        );

        Ok(SessionReport {
            summary: stats.summary(outcome),
            session,
        })
    }
}

/// Keep at most `remaining` eligible items; ineligible ones stay so they are
/// skipped cheaply. Returns the kept items and how many were cut.
pub fn truncate_to_quota<F>(items: Vec<MediaItem>, remaining: u32, is_eligible: F) -> (Vec<MediaItem>, u32)
where
    F: Fn(&MediaItem) -> bool,
{
    let mut kept = Vec::with_capacity(items.len());
    let mut eligible = 0u32;
    let mut cut = 0u32;

    for item in items {
        if !is_eligible(&item) {
            kept.push(item);
        } else if eligible < remaining {
            eligible += 1;
            kept.push(item);
        } else {
            cut += 1;
        }
    }

    (kept, cut)
}

/// Sleep for `delay`. Returns false if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
