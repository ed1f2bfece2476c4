//! The shared, fail-static event window.
//!
//! [`EventWindowManager`] is the only writer. A refresh builds a complete new
//! [`EventWindow`] off to the side and swaps it in under the write lock, so
//! readers see either the old window or the new one, never a mix. A refresh
//! that produced nothing leaves the previous window exactly as it was.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::model::Occurrence;
use crate::skipped::SkippedStore;

/// A bounded, start-ordered list of occurrences plus refresh bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventWindow {
    occurrences: Vec<Occurrence>,
    populated: bool,
    contributing_sources: usize,
    last_updated: Option<DateTime<Utc>>,
}

impl EventWindow {
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Whether any refresh has ever installed data.
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn contributing_sources(&self) -> usize {
        self.contributing_sources
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateSeverity {
    Ok,
    /// Nothing new, but previously fetched data is still being served.
    Degraded,
    /// Nothing new and nothing cached.
    Critical,
}

/// Result of one [`EventWindowManager::update`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowUpdate {
    pub updated: bool,
    pub count: usize,
    pub message: String,
    pub severity: UpdateSeverity,
}

#[derive(Default)]
pub struct EventWindowManager {
    current: RwLock<Arc<EventWindow>>,
}

impl EventWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current window. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<EventWindow> {
        Arc::clone(&self.current.read())
    }

    /// Merge a refresh result into the shared window.
    ///
    /// Empty input keeps the existing window untouched and reports the
    /// previous count. Otherwise occurrences that have already ended are
    /// dropped, duplicates (same uid and recurrence-id) collapse to the first
    /// seen, the rest is sorted by start and truncated to `window_size`.
    pub fn update(
        &self,
        new_occurrences: Vec<Occurrence>,
        now: DateTime<Utc>,
        skip_store: Option<&SkippedStore>,
        window_size: usize,
        configured_source_count: usize,
    ) -> WindowUpdate {
        if new_occurrences.is_empty() {
            return self.fail_static(configured_source_count);
        }

        let received = new_occurrences.len();
        let mut seen = HashSet::new();
        let mut merged: Vec<Occurrence> = new_occurrences
            .into_iter()
            .filter(|o| o.effective_end() >= now)
            .filter(|o| seen.insert(o.id()))
            .collect();
        merged.sort_by(|a, b| {
            a.start_utc()
                .cmp(&b.start_utc())
                .then_with(|| a.uid.cmp(&b.uid))
        });
        merged.truncate(window_size);

        let contributing_sources = merged
            .iter()
            .map(|o| o.source.as_str())
            .collect::<HashSet<_>>()
            .len();
        let skipped = skip_store.map_or(0, |store| {
            merged
                .iter()
                .filter(|o| store.is_skipped_at(&o.id().key(), now))
                .count()
        });

        let window = Arc::new(EventWindow {
            occurrences: merged,
            populated: true,
            contributing_sources,
            last_updated: Some(now),
        });
        let count = window.len();
        *self.current.write() = window;

        let message = format!(
            "window updated: {count} events ({received} received) from {contributing_sources}/{configured_source_count} sources, {skipped} skipped"
        );
        tracing::info!(count, received, contributing_sources, skipped, "event window updated");

        WindowUpdate {
            updated: true,
            count,
            message,
            severity: UpdateSeverity::Ok,
        }
    }

    fn fail_static(&self, configured_source_count: usize) -> WindowUpdate {
        let previous = self.snapshot();
        let count = previous.len();

        if count > 0 {
            let message = format!(
                "no new events from {configured_source_count} sources; keeping {count} cached events"
            );
            tracing::warn!(count, configured_source_count, "refresh produced nothing, serving cached window");
            WindowUpdate {
                updated: false,
                count,
                message,
                severity: UpdateSeverity::Degraded,
            }
        } else {
            let message = format!(
                "no events from {configured_source_count} sources and no cached data"
            );
            tracing::error!(
                severity = "CRITICAL",
                configured_source_count,
                ever_populated = previous.is_populated(),
                "refresh produced nothing and the window is empty"
            );
            WindowUpdate {
                updated: false,
                count,
                message,
                severity: UpdateSeverity::Critical,
            }
        }
    }
}
