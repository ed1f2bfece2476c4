//! # agenda-engine
//!
//! Calendar recurrence expansion and "what's next?" resolution for
//! always-on agenda displays.
//!
//! Raw event records from any number of calendar feeds are expanded into
//! concrete, timezone-correct occurrences, guarded against malformed feeds,
//! merged into a bounded shared window that survives total fetch failure, and
//! reduced to the single event a user most likely cares about next.
//!
//! ## Modules
//!
//! - [`model`]: Event times with provenance, occurrences, raw feed records
//! - [`ical`]: Decoding of iCalendar date, date-time, TZID and DURATION values
//! - [`expander`]: RRULE + EXDATE + RECURRENCE-ID → concrete occurrences
//! - [`telemetry`]: Per-source parse counters and the duplicate-flood circuit breaker
//! - [`source`]: Calendar source descriptors and per-source parse sessions
//! - [`fetch`]: Bounded-concurrency multi-source fetching with a batch deadline
//! - [`window`]: The shared, fail-static event window
//! - [`skipped`]: Durable per-event dismissals with a TTL
//! - [`prioritizer`]: Next-event selection with lunch/business grouping
//! - [`service`]: The refresh loop and the entry points for presentation layers
//! - [`config`]: Typed, validated engine settings
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod expander;
pub mod fetch;
pub mod ical;
pub mod model;
pub mod prioritizer;
pub mod service;
pub mod skipped;
pub mod source;
pub mod telemetry;
pub mod window;

pub use config::{BreakerThresholds, EngineConfig, ValidatedConfig, MAX_FETCH_CONCURRENCY};
pub use error::{EngineError, StoreError};
pub use expander::{
    expand_series, ExceptionSet, ExpansionWindow, Frequency, RecurrenceRule, SeriesDefinition,
};
pub use fetch::{fetch_all, fetch_and_expand, FeedFetcher, FetchReport, SourceFailure};
pub use model::{EventTime, Occurrence, OccurrenceId, RawEvent, RawValue};
pub use prioritizer::{
    is_focus_time, EventClass, EventClassifier, EventPrioritizer, LunchHeuristic, NextEvent,
};
pub use service::AgendaService;
pub use skipped::SkippedStore;
pub use source::{parse_source, CalendarSource};
pub use telemetry::{BreakerSeverity, ParserTelemetry, TelemetrySnapshot};
pub use window::{EventWindow, EventWindowManager, UpdateSeverity, WindowUpdate};
