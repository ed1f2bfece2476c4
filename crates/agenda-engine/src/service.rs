//! The explicit service object tying the pipeline together.
//!
//! Presentation layers hold an `Arc<AgendaService>`: one task drives
//! [`AgendaService::run`], everything else calls [`AgendaService::next_event`]
//! or the skip operations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ValidatedConfig;
use crate::error::StoreError;
use crate::fetch::{fetch_and_expand, FeedFetcher};
use crate::prioritizer::{EventPrioritizer, NextEvent};
use crate::skipped::SkippedStore;
use crate::source::CalendarSource;
use crate::window::{EventWindow, EventWindowManager, WindowUpdate};

pub struct AgendaService {
    config: ValidatedConfig,
    sources: Vec<CalendarSource>,
    fetcher: Arc<dyn FeedFetcher>,
    window: EventWindowManager,
    skips: Arc<SkippedStore>,
    prioritizer: EventPrioritizer,
}

impl AgendaService {
    pub fn new(
        config: ValidatedConfig,
        sources: Vec<CalendarSource>,
        fetcher: Arc<dyn FeedFetcher>,
        skips: Arc<SkippedStore>,
        prioritizer: EventPrioritizer,
    ) -> Self {
        Self {
            config,
            sources,
            fetcher,
            window: EventWindowManager::new(),
            skips,
            prioritizer,
        }
    }

    /// Build a service whose skip store and prioritizer follow `config`.
    pub fn from_config(
        config: ValidatedConfig,
        sources: Vec<CalendarSource>,
        fetcher: Arc<dyn FeedFetcher>,
        skip_path: impl Into<PathBuf>,
    ) -> Self {
        let skips = Arc::new(SkippedStore::open(skip_path, config.skip_ttl()));
        let prioritizer = EventPrioritizer::new().with_grouping_window(config.grouping_window());
        Self::new(config, sources, fetcher, skips, prioritizer)
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn sources(&self) -> &[CalendarSource] {
        &self.sources
    }

    pub fn skip_store(&self) -> &Arc<SkippedStore> {
        &self.skips
    }

    pub fn window(&self) -> Arc<EventWindow> {
        self.window.snapshot()
    }

    /// Fetch and expand every source, then merge the result into the window.
    ///
    /// Per-source failures are logged and excluded. When nothing at all comes
    /// back the previous window is kept.
    pub async fn refresh_once(&self, now: DateTime<Utc>) -> WindowUpdate {
        let span = tracing::info_span!("refresh", sources = self.sources.len());
        let report = fetch_and_expand(&self.sources, Arc::clone(&self.fetcher), &self.config, now)
            .instrument(span)
            .await;

        for failure in &report.failed {
            tracing::warn!(source = %failure.source, reason = %failure.reason, "source excluded this cycle");
        }
        if report.timed_out {
            tracing::warn!(
                deadline_secs = self.config.fetch_deadline().as_secs(),
                "fetch batch hit its deadline"
            );
        }

        let update = self.window.update(
            report.occurrences,
            now,
            Some(&self.skips),
            self.config.event_window_size(),
            self.sources.len(),
        );
        tracing::debug!(message = %update.message, severity = ?update.severity, "refresh finished");
        update
    }

    /// Refresh on a fixed interval until `cancel` fires.
    ///
    /// Cancellation is only observed between cycles and during the sleep; a
    /// refresh that has started always finishes.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = self.config.refresh_interval();
        tracing::info!(interval_secs = interval.as_secs(), "refresh loop started");

        while !cancel.is_cancelled() {
            self.refresh_once(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("refresh loop stopped");
    }

    /// The event to show next, if any.
    pub fn next_event(&self, now: DateTime<Utc>) -> Option<NextEvent> {
        let snapshot = self.window.snapshot();
        self.prioritizer
            .find_next(snapshot.occurrences(), now, &self.skips)
    }

    /// Dismiss `id` for the configured TTL. Returns the ISO-8601 expiry.
    pub async fn skip(&self, id: impl Into<String>) -> Result<String, StoreError> {
        self.skip_at(id, Utc::now()).await
    }

    /// [`skip`](Self::skip) with the TTL counted from `now`.
    pub async fn skip_at(
        &self,
        id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = id.into();
        let store = Arc::clone(&self.skips);
        tokio::task::spawn_blocking(move || store.add_skip_at(&id, now))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn clear_skips(&self) -> Result<usize, StoreError> {
        let store = Arc::clone(&self.skips);
        tokio::task::spawn_blocking(move || store.clear_all())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn active_skips(&self) -> BTreeMap<String, String> {
        self.skips.active_list()
    }
}
