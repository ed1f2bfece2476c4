//! "What's next?" selection over the shared event window.
//!
//! Only strictly upcoming occurrences are candidates. Free-time (transparent)
//! entries, focus-time blocks and events the user dismissed are dropped. When several candidates start
//! close together, a business event beats a lunch slot.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::Occurrence;
use crate::skipped::SkippedStore;

/// Candidates starting within this many seconds of the earliest one compete.
pub const DEFAULT_GROUPING_WINDOW_SECONDS: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventClass {
    Lunch,
    Business,
}

/// Decides how an occurrence competes with others starting at about the same time.
pub trait EventClassifier: Send + Sync {
    fn classify(&self, occurrence: &Occurrence) -> EventClass;
}

/// A short subject mentioning "lunch" (at most 10 characters) is a lunch
/// slot; everything else is business.
#[derive(Debug, Clone, Copy, Default)]
pub struct LunchHeuristic;

impl EventClassifier for LunchHeuristic {
    fn classify(&self, occurrence: &Occurrence) -> EventClass {
        let subject = &occurrence.subject;
        if subject.to_lowercase().contains("lunch") && subject.chars().count() <= 10 {
            EventClass::Lunch
        } else {
            EventClass::Business
        }
    }
}

pub type FocusFilter = Box<dyn Fn(&Occurrence) -> bool + Send + Sync>;

/// Default focus-time predicate: a "focus" category, or a subject starting
/// with "focus time" (case-insensitive).
pub fn is_focus_time(occurrence: &Occurrence) -> bool {
    occurrence
        .categories
        .iter()
        .any(|c| c.trim().eq_ignore_ascii_case("focus"))
        || occurrence
            .subject
            .trim_start()
            .to_lowercase()
            .starts_with("focus time")
}

/// The selected event and how long until it starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextEvent {
    pub occurrence: Occurrence,
    pub seconds_until: i64,
}

pub struct EventPrioritizer {
    classifier: Box<dyn EventClassifier>,
    focus_filter: FocusFilter,
    grouping_window: Duration,
}

impl Default for EventPrioritizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPrioritizer {
    pub fn new() -> Self {
        Self {
            classifier: Box::new(LunchHeuristic),
            focus_filter: Box::new(is_focus_time),
            grouping_window: Duration::seconds(DEFAULT_GROUPING_WINDOW_SECONDS),
        }
    }

    pub fn with_classifier(mut self, classifier: impl EventClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_focus_filter(
        mut self,
        filter: impl Fn(&Occurrence) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.focus_filter = Box::new(filter);
        self
    }

    pub fn with_grouping_window(mut self, window: Duration) -> Self {
        self.grouping_window = window;
        self
    }

    /// Pick the next event from `occurrences` (expected sorted by start).
    ///
    /// Returns `None` when nothing upcoming survives filtering. An event
    /// already in progress is never "next".
    ///
    /// # Examples
    ///
    /// ```
    /// use agenda_engine::model::{EventTime, Occurrence};
    /// use agenda_engine::{EventPrioritizer, SkippedStore};
    /// use chrono::{Duration, TimeZone, Utc};
    ///
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 45, 0).unwrap();
    /// let at = |minutes: i64| EventTime::Utc { at: now + Duration::minutes(minutes) };
    /// let events = vec![
    ///     Occurrence::new("lunch", "Lunch", at(15), Some(at(75))),
    ///     Occurrence::new("sync", "Project Sync", at(20), Some(at(50))),
    /// ];
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let skips = SkippedStore::with_default_ttl(dir.path().join("skipped.json"));
    /// let next = EventPrioritizer::new().find_next(&events, now, &skips).unwrap();
    /// assert_eq!(next.occurrence.subject, "Project Sync");
    /// assert_eq!(next.seconds_until, 20 * 60);
    /// ```
    pub fn find_next(
        &self,
        occurrences: &[Occurrence],
        now: DateTime<Utc>,
        skip_store: &SkippedStore,
    ) -> Option<NextEvent> {
        let mut candidates: Vec<&Occurrence> = occurrences
            .iter()
            .filter(|o| o.start_utc() >= now && !o.transparent)
            .filter(|o| !(self.focus_filter)(o))
            .filter(|o| !skip_store.is_skipped_at(&o.id().key(), now))
            .collect();
        candidates.sort_by_key(|o| o.start_utc());

        let earliest = candidates.first()?.start_utc();
        let group: Vec<&Occurrence> = candidates
            .iter()
            .copied()
            .take_while(|o| o.start_utc() - earliest <= self.grouping_window)
            .collect();

        let chosen = if group.len() > 1 {
            group
                .iter()
                .copied()
                .find(|o| self.classifier.classify(o) == EventClass::Business)
                .unwrap_or(group[0])
        } else {
            group[0]
        };

        Some(NextEvent {
            occurrence: chosen.clone(),
            seconds_until: (chosen.start_utc() - now).num_seconds(),
        })
    }
}
