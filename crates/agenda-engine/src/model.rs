//! Core data model: time values with provenance, occurrences, and the raw
//! records handed over by the calendar tokenizer.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ── EventTime ───────────────────────────────────────────────────────────────

/// A calendar time value, keeping track of how it was expressed.
///
/// Presentation layers need the provenance (an all-day event must not be
/// shown as "00:00"), while ordering only ever looks at [`EventTime::to_utc`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTime {
    /// Date-only value. Anchored at local midnight in `tz` (UTC when absent).
    Date { date: NaiveDate, tz: Option<Tz> },
    /// An instant carrying an explicit UTC marker.
    Utc { at: DateTime<Utc> },
    /// Wall-clock time with neither zone nor UTC marker. Interpreted as UTC.
    Floating { local: NaiveDateTime },
    /// Wall-clock time qualified by an IANA zone.
    Zoned { local: NaiveDateTime, tz: Tz },
}

impl EventTime {
    /// Resolve to a UTC instant.
    ///
    /// Zoned values use the zone's offset in effect on their own date. Local
    /// times inside a spring-forward gap are read with the offset in force
    /// before the gap; times inside a fall-back fold take the earlier instant.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Utc { at } => *at,
            EventTime::Floating { local } => local.and_utc(),
            EventTime::Zoned { local, tz } => resolve_local(tz, *local),
            EventTime::Date { date, tz } => {
                let midnight = date.and_time(chrono::NaiveTime::MIN);
                match tz {
                    Some(tz) => resolve_local(tz, midnight),
                    None => midnight.and_utc(),
                }
            }
        }
    }

    pub fn is_date_only(&self) -> bool {
        matches!(self, EventTime::Date { .. })
    }

    /// The zone this value was expressed in, if any.
    pub fn timezone(&self) -> Option<Tz> {
        match self {
            EventTime::Date { tz, .. } => *tz,
            EventTime::Zoned { tz, .. } => Some(*tz),
            EventTime::Utc { .. } | EventTime::Floating { .. } => None,
        }
    }

    /// Re-express `instant` with the same provenance as `self`.
    ///
    /// Used when a recurrence generates a new slot: a zoned master yields
    /// zoned occurrences, a date-only master yields date-only occurrences.
    pub fn with_instant(&self, instant: DateTime<Utc>) -> EventTime {
        match self {
            EventTime::Utc { .. } => EventTime::Utc { at: instant },
            EventTime::Floating { .. } => EventTime::Floating {
                local: instant.naive_utc(),
            },
            EventTime::Zoned { tz, .. } => EventTime::Zoned {
                local: instant.with_timezone(tz).naive_local(),
                tz: *tz,
            },
            EventTime::Date { tz, .. } => {
                let date = match tz {
                    Some(tz) => instant.with_timezone(tz).date_naive(),
                    None => instant.date_naive(),
                };
                EventTime::Date { date, tz: *tz }
            }
        }
    }

    /// Shift by `delta`, preserving wall-clock time for zoned values.
    ///
    /// Date-only values move by whole days. Returns `None` when the result
    /// falls outside the representable range.
    pub fn shifted(&self, delta: Duration) -> Option<EventTime> {
        Some(match self {
            EventTime::Utc { at } => EventTime::Utc {
                at: at.checked_add_signed(delta)?,
            },
            EventTime::Floating { local } => EventTime::Floating {
                local: local.checked_add_signed(delta)?,
            },
            EventTime::Zoned { local, tz } => EventTime::Zoned {
                local: local.checked_add_signed(delta)?,
                tz: *tz,
            },
            EventTime::Date { date, tz } => EventTime::Date {
                date: date.checked_add_signed(Duration::try_days(delta.num_days())?)?,
                tz: *tz,
            },
        })
    }

    /// The wall-clock reading of this value (UTC for instants, midnight for dates).
    pub(crate) fn wall_clock(&self) -> NaiveDateTime {
        match self {
            EventTime::Utc { at } => at.naive_utc(),
            EventTime::Floating { local } | EventTime::Zoned { local, .. } => *local,
            EventTime::Date { date, .. } => date.and_time(chrono::NaiveTime::MIN),
        }
    }

    /// Same provenance as `self`, at wall-clock time `local`.
    pub(crate) fn with_wall_clock(&self, local: NaiveDateTime) -> EventTime {
        match self {
            EventTime::Utc { .. } => EventTime::Utc {
                at: local.and_utc(),
            },
            EventTime::Floating { .. } => EventTime::Floating { local },
            EventTime::Zoned { tz, .. } => EventTime::Zoned { local, tz: *tz },
            EventTime::Date { tz, .. } => EventTime::Date {
                date: local.date(),
                tz: *tz,
            },
        }
    }

    /// Wall-clock difference `other - self`, the quantity a recurring event
    /// preserves across DST changes.
    pub(crate) fn local_span_to(&self, other: &EventTime) -> Duration {
        match (self, other) {
            (EventTime::Date { date: a, .. }, EventTime::Date { date: b, .. }) => {
                Duration::days((*b - *a).num_days())
            }
            (EventTime::Zoned { local: a, tz: ta }, EventTime::Zoned { local: b, tz: tb })
                if ta == tb =>
            {
                *b - *a
            }
            (EventTime::Floating { local: a }, EventTime::Floating { local: b }) => *b - *a,
            _ => other.to_utc() - self.to_utc(),
        }
    }
}

/// Resolve a zone-local wall-clock time to UTC.
pub(crate) fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Gap: use the offset that was in force before the transition.
            let before = local - Duration::hours(12);
            let offset = tz
                .offset_from_utc_datetime(&before)
                .fix()
                .local_minus_utc();
            (local - Duration::seconds(offset as i64)).and_utc()
        }
    }
}

// ── Occurrence ──────────────────────────────────────────────────────────────

/// Identity of one concrete occurrence: the series uid plus, for instances
/// of a recurring series, the UTC instant of the generated slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccurrenceId {
    pub uid: String,
    pub recurrence_id: Option<DateTime<Utc>>,
}

impl OccurrenceId {
    /// Stable string key, used by the skip store.
    pub fn key(&self) -> String {
        match self.recurrence_id {
            Some(rid) => format!("{}::{}", self.uid, rid.format("%Y%m%dT%H%M%SZ")),
            None => self.uid.clone(),
        }
    }
}

/// One concrete event instance on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub uid: String,
    pub recurrence_id: Option<DateTime<Utc>>,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub subject: String,
    pub location: Option<String>,
    pub all_day: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Name of the source this occurrence came from.
    #[serde(default)]
    pub source: String,
    /// Marked as free time (`TRANSP:TRANSPARENT`).
    #[serde(default)]
    pub transparent: bool,
    start_utc: DateTime<Utc>,
    end_utc: Option<DateTime<Utc>>,
}

impl Occurrence {
    /// Build an occurrence, resolving its UTC bounds.
    ///
    /// An end earlier than the start is clamped to the start.
    pub fn new(
        uid: impl Into<String>,
        subject: impl Into<String>,
        start: EventTime,
        end: Option<EventTime>,
    ) -> Self {
        let start_utc = start.to_utc();
        let (end, end_utc) = match end {
            Some(end) => {
                let end_utc = end.to_utc();
                if end_utc < start_utc {
                    (Some(start.clone()), Some(start_utc))
                } else {
                    (Some(end), Some(end_utc))
                }
            }
            None => (None, None),
        };
        let all_day = start.is_date_only();
        Self {
            uid: uid.into(),
            recurrence_id: None,
            start,
            end,
            subject: subject.into(),
            location: None,
            all_day,
            categories: Vec::new(),
            source: String::new(),
            transparent: false,
            start_utc,
            end_utc,
        }
    }

    pub fn with_recurrence_id(mut self, recurrence_id: DateTime<Utc>) -> Self {
        self.recurrence_id = Some(recurrence_id);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn id(&self) -> OccurrenceId {
        OccurrenceId {
            uid: self.uid.clone(),
            recurrence_id: self.recurrence_id,
        }
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start_utc
    }

    pub fn end_utc(&self) -> Option<DateTime<Utc>> {
        self.end_utc
    }

    /// The instant after which this occurrence is over. Zero-length events
    /// end when they start.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_utc.unwrap_or(self.start_utc)
    }
}

// ── Raw tokenizer records ───────────────────────────────────────────────────

/// A single property value as produced by the calendar tokenizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValue {
    pub value: String,
    #[serde(default)]
    pub tzid: Option<String>,
}

impl RawValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tzid: None,
        }
    }

    pub fn zoned(value: impl Into<String>, tzid: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tzid: Some(tzid.into()),
        }
    }
}

/// One event record from a feed. A master carries `rrule`/`exdates`; an
/// override carries `recurrence_id` and shares the master's `uid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub uid: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub location: Option<String>,
    pub dtstart: RawValue,
    #[serde(default)]
    pub dtend: Option<RawValue>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub rrule: Option<String>,
    #[serde(default)]
    pub exdates: Vec<RawValue>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub recurrence_id: Option<RawValue>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub transparent: bool,
}

impl RawEvent {
    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }
}
