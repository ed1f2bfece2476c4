//! Recurrence expansion: one series definition → bounded, ordered occurrences.
//!
//! The rule grammar accepted here is the subset kiosk feeds actually use:
//! `FREQ` of DAILY, WEEKLY or MONTHLY, plus `INTERVAL`, `COUNT`, `UNTIL`,
//! `BYDAY` (with signed ordinals for the "Nth weekday of month" form),
//! `BYMONTHDAY` and `WKST`. Anything else is rejected rather than guessed at.
//!
//! Expansion is lazy. Slots are pulled one at a time from the `rrule` crate
//! and iteration stops at the first of: `COUNT` exhausted, a slot past
//! `UNTIL`, a slot past the expansion horizon, or [`MAX_GENERATED_INSTANCES`]
//! slots generated in total, before the window included.
//!
//! A series without `COUNT` has its start moved forward by whole recurrence
//! periods to just before the window, so a daily event whose DTSTART is
//! decades old costs the same as one that started last week.
//!
//! # Time zones
//!
//! Zoned starts are expanded with `DTSTART;TZID=...`, so each slot keeps its
//! wall-clock time and picks up the offset in force on its own date. Floating
//! starts are pinned to UTC. Date-only starts are anchored at local midnight
//! in their zone (UTC when none is given) and stay date-only in the output.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday,
};
use rrule::RRuleSet;

use crate::error::{EngineError, Result};
use crate::model::{resolve_local, EventTime, Occurrence};

/// Ceiling on slots generated for one series in one expansion, counting
/// those that fall before the window.
pub const MAX_GENERATED_INSTANCES: usize = 10_000;

// ── Rule model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        })
    }
}

/// A `BYDAY` entry, e.g. `MO`, `1MO` ("first Monday") or `-1FR` ("last Friday").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
    pub ordinal: Option<i8>,
    pub weekday: Weekday,
}

impl fmt::Display for ByDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

/// `UNTIL` as written. Its instant depends on the series' start zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleUntil {
    /// Date-only: inclusive through the end of that day.
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    /// No `Z` marker: read in the series' own zone.
    Local(NaiveDateTime),
}

/// A parsed, validated recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<RuleUntil>,
    pub by_day: Vec<ByDay>,
    pub by_month_day: Vec<i8>,
    pub week_start: Option<Weekday>,
}

impl RecurrenceRule {
    /// Parse RRULE text (`FREQ=WEEKLY;BYDAY=MO,WE`), with or without the
    /// leading `RRULE:`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRule`] for a missing or unsupported
    /// `FREQ`, non-positive `INTERVAL`/`COUNT`, malformed values, ordinals on
    /// a non-monthly rule, or any rule part outside the supported subset.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let body = match trimmed.get(..6) {
            Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &trimmed[6..],
            _ => trimmed,
        };
        let invalid = |msg: String| EngineError::InvalidRule(format!("{msg} in '{trimmed}'"));

        let mut frequency = None;
        let mut interval = 1u32;
        let mut count = None;
        let mut until = None;
        let mut by_day = Vec::new();
        let mut by_month_day = Vec::new();
        let mut week_start = None;

        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("rule part '{part}' has no value")))?;
            match key.to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => return Err(invalid(format!("unsupported FREQ '{other}'"))),
                    })
                }
                "INTERVAL" => {
                    interval = value
                        .parse()
                        .ok()
                        .filter(|n: &u32| *n >= 1)
                        .ok_or_else(|| invalid(format!("bad INTERVAL '{value}'")))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse()
                            .ok()
                            .filter(|n: &u32| *n >= 1)
                            .ok_or_else(|| invalid(format!("bad COUNT '{value}'")))?,
                    );
                }
                "UNTIL" => {
                    until = Some(
                        parse_until(value).ok_or_else(|| invalid(format!("bad UNTIL '{value}'")))?,
                    );
                }
                "BYDAY" => {
                    for item in value.split(',') {
                        by_day.push(
                            parse_by_day(item)
                                .ok_or_else(|| invalid(format!("bad BYDAY entry '{item}'")))?,
                        );
                    }
                }
                "BYMONTHDAY" => {
                    for item in value.split(',') {
                        let day: i8 = item
                            .trim()
                            .parse()
                            .ok()
                            .filter(|d: &i8| *d != 0 && (-31..=31).contains(d))
                            .ok_or_else(|| invalid(format!("bad BYMONTHDAY '{item}'")))?;
                        by_month_day.push(day);
                    }
                }
                "WKST" => {
                    week_start = Some(
                        parse_weekday_code(value)
                            .ok_or_else(|| invalid(format!("bad WKST '{value}'")))?,
                    );
                }
                other => return Err(invalid(format!("unsupported rule part '{other}'"))),
            }
        }

        let frequency = frequency.ok_or_else(|| invalid("missing FREQ".to_string()))?;
        if frequency != Frequency::Monthly && by_day.iter().any(|d| d.ordinal.is_some()) {
            return Err(invalid(
                "BYDAY ordinals are only valid with FREQ=MONTHLY".to_string(),
            ));
        }
        if frequency != Frequency::Monthly && !by_month_day.is_empty() {
            return Err(invalid(
                "BYMONTHDAY is only valid with FREQ=MONTHLY".to_string(),
            ));
        }

        Ok(Self {
            frequency,
            interval,
            count,
            until,
            by_day,
            by_month_day,
            week_start,
        })
    }

    /// `UNTIL` as a UTC instant, interpreted relative to the series start.
    pub fn until_instant(&self, start: &EventTime) -> Option<DateTime<Utc>> {
        let tz = start.timezone();
        self.until.map(|until| match until {
            RuleUntil::Utc(at) => at,
            RuleUntil::Local(local) => match tz {
                Some(tz) => resolve_local(&tz, local),
                None => local.and_utc(),
            },
            RuleUntil::Date(date) => {
                let end_of_day = date.and_time(NaiveTime::MIN) + Duration::days(1)
                    - Duration::seconds(1);
                match tz {
                    Some(tz) => resolve_local(&tz, end_of_day),
                    None => end_of_day.and_utc(),
                }
            }
        })
    }

    /// RFC 5545 text handed to the `rrule` crate.
    ///
    /// `UNTIL` is left out: it is enforced during iteration, which also lets
    /// `COUNT` and `UNTIL` coexist.
    fn to_rrule_text(&self) -> String {
        let mut parts = vec![
            format!("FREQ={}", self.frequency),
            format!("INTERVAL={}", self.interval),
        ];
        if let Some(count) = self.count {
            parts.push(format!("COUNT={count}"));
        }
        if !self.by_day.is_empty() {
            let days: Vec<String> = self.by_day.iter().map(ToString::to_string).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        if !self.by_month_day.is_empty() {
            let days: Vec<String> = self.by_month_day.iter().map(ToString::to_string).collect();
            parts.push(format!("BYMONTHDAY={}", days.join(",")));
        }
        if let Some(wkst) = self.week_start {
            parts.push(format!("WKST={}", weekday_code(wkst)));
        }
        parts.join(";")
    }
}

impl FromStr for RecurrenceRule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_weekday_code(s: &str) -> Option<Weekday> {
    match s.trim().to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse `MO`, `1MO`, `+2TU`, `-1FR`. Ordinals must be within ±1..=5.
fn parse_by_day(s: &str) -> Option<ByDay> {
    let s = s.trim();
    if s.len() < 2 || !s.is_ascii() {
        return None;
    }
    let (prefix, code) = s.split_at(s.len() - 2);
    let weekday = parse_weekday_code(code)?;
    let ordinal = if prefix.is_empty() {
        None
    } else {
        let n: i8 = prefix.trim_start_matches('+').parse().ok()?;
        if n == 0 || !(-5..=5).contains(&n) {
            return None;
        }
        Some(n)
    };
    Some(ByDay { ordinal, weekday })
}

fn parse_until(s: &str) -> Option<RuleUntil> {
    let s = s.trim();
    if s.len() == 8 {
        return NaiveDate::parse_from_str(s, "%Y%m%d")
            .ok()
            .map(RuleUntil::Date);
    }
    if let Some(stripped) = s.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
            .ok()
            .map(|n| RuleUntil::Utc(n.and_utc()));
    }
    NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
        .ok()
        .map(RuleUntil::Local)
}

// ── Exceptions ──────────────────────────────────────────────────────────────

/// EXDATEs and RECURRENCE-ID overrides of one series.
#[derive(Debug, Clone, Default)]
pub struct ExceptionSet {
    excluded_instants: HashSet<DateTime<Utc>>,
    excluded_dates: HashSet<NaiveDate>,
    overrides: HashMap<DateTime<Utc>, Occurrence>,
}

impl ExceptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude a slot. Zone-qualified values are read in their own zone;
    /// date-only values exclude whichever slot falls on that local date.
    pub fn exclude(&mut self, at: &EventTime) {
        match at {
            EventTime::Date { date, .. } => {
                self.excluded_dates.insert(*date);
            }
            other => {
                self.excluded_instants.insert(other.to_utc());
            }
        }
    }

    /// Register a moved instance. `recurrence_id` must already be aligned with
    /// the series start (see [`align_recurrence_id`]).
    pub fn add_override(&mut self, recurrence_id: &EventTime, replacement: Occurrence) {
        let key = recurrence_id.to_utc();
        self.overrides
            .insert(key, replacement.with_recurrence_id(key));
    }

    pub fn is_empty(&self) -> bool {
        self.excluded_instants.is_empty()
            && self.excluded_dates.is_empty()
            && self.overrides.is_empty()
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    fn excludes(&self, slot: &EventTime, slot_utc: DateTime<Utc>) -> bool {
        if self.excluded_instants.contains(&slot_utc) {
            return true;
        }
        if self.excluded_dates.is_empty() {
            return false;
        }
        let local_date = match slot {
            EventTime::Date { date, .. } => *date,
            EventTime::Zoned { local, .. } | EventTime::Floating { local } => local.date(),
            EventTime::Utc { at } => at.date_naive(),
        };
        self.excluded_dates.contains(&local_date)
    }
}

/// Give a date-only RECURRENCE-ID the zone of a date-only series start, so
/// both resolve to the same anchor instant.
pub fn align_recurrence_id(recurrence_id: EventTime, series_start: &EventTime) -> EventTime {
    match (recurrence_id, series_start) {
        (EventTime::Date { date, tz: None }, EventTime::Date { tz, .. }) => {
            EventTime::Date { date, tz: *tz }
        }
        (EventTime::Date { date, tz: None }, start) if start.timezone().is_some() => {
            EventTime::Date {
                date,
                tz: start.timezone(),
            }
        }
        (other, _) => other,
    }
}

// ── Window ──────────────────────────────────────────────────────────────────

/// The span of time occurrences are materialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExpansionWindow {
    /// `[now, now + horizon_days]`.
    pub fn from_now(now: DateTime<Utc>, horizon_days: u32) -> Self {
        Self {
            start: now,
            end: now
                .checked_add_signed(Duration::days(i64::from(horizon_days)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// In-progress occurrences count as inside the window.
    pub fn contains(&self, occ: &Occurrence) -> bool {
        occ.effective_end() >= self.start && occ.start_utc() <= self.end
    }
}

// ── Series expansion ────────────────────────────────────────────────────────

/// A master event: the template occurrence plus its recurrence data.
#[derive(Debug, Clone)]
pub struct SeriesDefinition {
    pub master: Occurrence,
    pub rule: Option<RecurrenceRule>,
    pub exceptions: ExceptionSet,
}

impl SeriesDefinition {
    pub fn single(master: Occurrence) -> Self {
        Self {
            master,
            rule: None,
            exceptions: ExceptionSet::new(),
        }
    }
}

/// Expand a series into the occurrences that fall inside `window`.
///
/// Output is sorted by start instant. A generated slot and its override
/// never both appear: the override takes the slot's place, carrying the
/// slot's instant as its `recurrence_id`.
///
/// # Errors
///
/// Returns [`EngineError::Expansion`] if the `rrule` crate rejects the
/// rendered rule (e.g. a start outside its supported range).
///
/// # Examples
///
/// A weekly meeting in New York keeps its 09:00 wall clock across the
/// March DST change, so its UTC start moves by an hour:
///
/// ```
/// use agenda_engine::expander::{
///     expand_series, ExceptionSet, ExpansionWindow, RecurrenceRule, SeriesDefinition,
/// };
/// use agenda_engine::ical::parse_event_time;
/// use agenda_engine::model::{Occurrence, RawValue};
/// use chrono::{TimeZone, Utc};
///
/// let start = parse_event_time(&RawValue::zoned("20260302T090000", "America/New_York"), false)?;
/// let end = parse_event_time(&RawValue::zoned("20260302T100000", "America/New_York"), false)?;
/// let series = SeriesDefinition {
///     master: Occurrence::new("planning", "Planning", start, Some(end)),
///     rule: Some(RecurrenceRule::parse("FREQ=WEEKLY;COUNT=3")?),
///     exceptions: ExceptionSet::new(),
/// };
///
/// let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
/// let occurrences = expand_series(&series, &ExpansionWindow::from_now(now, 30))?;
/// let hours: Vec<u32> = occurrences
///     .iter()
///     .map(|o| chrono::Timelike::hour(&o.start_utc()))
///     .collect();
/// assert_eq!(hours, vec![14, 13, 13]);
/// # Ok::<(), agenda_engine::EngineError>(())
/// ```
pub fn expand_series(series: &SeriesDefinition, window: &ExpansionWindow) -> Result<Vec<Occurrence>> {
    let master = &series.master;
    let Some(rule) = &series.rule else {
        return Ok(if window.contains(master) {
            vec![master.clone()]
        } else {
            Vec::new()
        });
    };

    let span = master
        .end
        .as_ref()
        .map(|end| master.start.local_span_to(end));
    let lead = span.unwrap_or_else(Duration::zero).max(Duration::zero());
    let anchor = fast_forward(&master.start, rule, lead, window);
    let rrule_set = build_rrule_set(&anchor, rule)?;
    let until = rule.until_instant(&master.start);

    let mut out = Vec::new();
    let mut consumed = HashSet::new();
    let mut generated = 0usize;

    for slot in rrule_set.into_iter() {
        generated += 1;
        if generated > MAX_GENERATED_INSTANCES {
            tracing::warn!(
                uid = %master.uid,
                limit = MAX_GENERATED_INSTANCES,
                "recurrence expansion hit slot ceiling, truncating"
            );
            break;
        }

        let slot_utc = slot.with_timezone(&Utc);
        if until.is_some_and(|u| slot_utc > u) || slot_utc > window.end {
            break;
        }

        if let Some(replacement) = series.exceptions.overrides.get(&slot_utc) {
            consumed.insert(slot_utc);
            if window.contains(replacement) {
                out.push(replacement.clone());
            }
            continue;
        }

        let start = master.start.with_instant(slot_utc);
        if series.exceptions.excludes(&start, slot_utc) {
            continue;
        }
        let end = span
            .map(|span| {
                start.shifted(span).ok_or_else(|| {
                    EngineError::Expansion(format!(
                        "end of slot {slot_utc} is out of range for '{}'",
                        master.uid
                    ))
                })
            })
            .transpose()?;
        let occ = instance_of(master, start, end, slot_utc);
        if occ.effective_end() < window.start {
            continue;
        }
        out.push(occ);
    }

    // Overrides whose slot was never generated (moved in from beyond the
    // horizon, or pointing past COUNT/UNTIL) still stand on their own.
    for (rid, replacement) in &series.exceptions.overrides {
        if !consumed.contains(rid) && window.contains(replacement) {
            out.push(replacement.clone());
        }
    }

    out.sort_by(|a, b| a.start_utc().cmp(&b.start_utc()).then_with(|| a.uid.cmp(&b.uid)));
    Ok(out)
}

/// Move an open-ended series' start forward by whole recurrence periods,
/// landing at least `lead` plus two days before the window opens.
///
/// Every slot skipped this way ends before the window. Series with `COUNT`
/// are left alone since counting needs every slot from the original start.
fn fast_forward(
    start: &EventTime,
    rule: &RecurrenceRule,
    lead: Duration,
    window: &ExpansionWindow,
) -> EventTime {
    if rule.count.is_some() {
        return start.clone();
    }
    let Some(target) = window
        .start
        .checked_sub_signed(lead)
        .and_then(|t| t.checked_sub_signed(Duration::days(2)))
    else {
        return start.clone();
    };
    let local = start.wall_clock();
    let target = target.naive_utc();
    if local >= target {
        return start.clone();
    }

    let interval = i64::from(rule.interval);
    let moved = match rule.frequency {
        Frequency::Daily | Frequency::Weekly => {
            let period = match rule.frequency {
                Frequency::Weekly => 7 * interval,
                _ => interval,
            };
            let days = (target.date() - local.date()).num_days();
            u64::try_from(days / period * period)
                .ok()
                .and_then(|skip| local.checked_add_days(Days::new(skip)))
        }
        Frequency::Monthly => {
            let months = i64::from(target.year() - local.year()) * 12
                + i64::from(target.month())
                - i64::from(local.month())
                - 1;
            let whole = months / interval * interval;
            // Day 31 does not exist in every month; step back until it does.
            (0..24)
                .map(|i| whole - i * interval)
                .take_while(|skip| *skip > 0)
                .find_map(|skip| {
                    let moved = local.checked_add_months(Months::new(u32::try_from(skip).ok()?))?;
                    (moved.day() == local.day()).then_some(moved)
                })
        }
    };

    match moved {
        Some(moved) if moved > local => start.with_wall_clock(moved),
        _ => start.clone(),
    }
}

fn instance_of(
    master: &Occurrence,
    start: EventTime,
    end: Option<EventTime>,
    slot: DateTime<Utc>,
) -> Occurrence {
    let mut occ = Occurrence::new(master.uid.clone(), master.subject.clone(), start, end)
        .with_recurrence_id(slot)
        .with_categories(master.categories.clone())
        .with_source(master.source.clone());
    occ.location = master.location.clone();
    occ.transparent = master.transparent;
    occ
}

fn build_rrule_set(start: &EventTime, rule: &RecurrenceRule) -> Result<RRuleSet> {
    let dtstart = match start {
        EventTime::Utc { at } => format!("DTSTART:{}", at.format("%Y%m%dT%H%M%SZ")),
        EventTime::Floating { local } => format!("DTSTART:{}Z", local.format("%Y%m%dT%H%M%S")),
        EventTime::Zoned { local, tz } => format!(
            "DTSTART;TZID={}:{}",
            tz.name(),
            local.format("%Y%m%dT%H%M%S")
        ),
        EventTime::Date { date, tz: None } => format!("DTSTART:{}T000000Z", date.format("%Y%m%d")),
        EventTime::Date { date, tz: Some(tz) } => {
            format!("DTSTART;TZID={}:{}T000000", tz.name(), date.format("%Y%m%d"))
        }
    };
    let text = format!("{dtstart}\nRRULE:{}", rule.to_rrule_text());
    text.parse::<RRuleSet>()
        .map_err(|e| EngineError::Expansion(format!("{e} (rule: {text})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn daily_master(start: DateTime<Utc>) -> Occurrence {
        Occurrence::new(
            "series-1",
            "Standup",
            EventTime::Utc { at: start },
            Some(EventTime::Utc {
                at: start + Duration::hours(1),
            }),
        )
    }

    fn series(master: Occurrence, rule: &str) -> SeriesDefinition {
        SeriesDefinition {
            master,
            rule: Some(RecurrenceRule::parse(rule).unwrap()),
            exceptions: ExceptionSet::new(),
        }
    }

    fn window(start: DateTime<Utc>, days: u32) -> ExpansionWindow {
        ExpansionWindow::from_now(start, days)
    }

    // ── parsing ─────────────────────────────────────────────────────────

    #[test]
    fn test_parse_basic_rule() {
        let rule = RecurrenceRule::parse("RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;COUNT=10")
            .unwrap();
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.count, Some(10));
        assert_eq!(rule.by_day.len(), 2);
        assert_eq!(rule.by_day[1].weekday, Weekday::Wed);
    }

    #[test]
    fn test_parse_ordinal_weekday() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY;BYDAY=1MO").unwrap();
        assert_eq!(
            rule.by_day,
            vec![ByDay {
                ordinal: Some(1),
                weekday: Weekday::Mon
            }]
        );
        let last = RecurrenceRule::parse("FREQ=MONTHLY;BYDAY=-1FR").unwrap();
        assert_eq!(last.by_day[0].ordinal, Some(-1));
    }

    #[test]
    fn test_interval_defaults_to_one() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").unwrap();
        assert_eq!(rule.interval, 1);
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        assert!(RecurrenceRule::parse("FREQ=YEARLY").is_err());
        assert!(RecurrenceRule::parse("FREQ=HOURLY").is_err());
        assert!(RecurrenceRule::parse("COUNT=3").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;COUNT=0").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;BYSETPOS=1").is_err());
        assert!(RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=1MO").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;UNTIL=tomorrow").is_err());
        assert!(RecurrenceRule::parse("garbage").is_err());
    }

    #[test]
    fn test_date_until_covers_whole_day() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=20260303").unwrap();
        let start = EventTime::Utc {
            at: utc(2026, 3, 1, 9, 0),
        };
        assert_eq!(
            rule.until_instant(&start),
            Some(utc(2026, 3, 3, 23, 59) + Duration::seconds(59))
        );
    }

    // ── expansion ───────────────────────────────────────────────────────

    #[test]
    fn test_count_limits_daily_series() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(daily_master(start), "FREQ=DAILY;COUNT=3");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        let starts: Vec<_> = out.iter().map(|o| o.start_utc()).collect();
        assert_eq!(
            starts,
            vec![start, start + Duration::days(1), start + Duration::days(2)]
        );
        assert!(out.iter().all(|o| o.recurrence_id == Some(o.start_utc())));
    }

    #[test]
    fn test_huge_count_terminates_at_horizon() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(daily_master(start), "FREQ=DAILY;COUNT=100000");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 7)).unwrap();
        assert_eq!(out.len(), 7);
        assert_eq!(out[0].start_utc(), start);
    }

    #[test]
    fn test_until_before_count_wins() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(
            daily_master(start),
            "FREQ=DAILY;COUNT=10;UNTIL=20260303T090000Z",
        );
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|o| o.start_utc() <= utc(2026, 3, 3, 9, 0)));
    }

    #[test]
    fn test_count_before_until_wins() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(
            daily_master(start),
            "FREQ=DAILY;COUNT=2;UNTIL=20260320T090000Z",
        );
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_exdate_drops_first_occurrence() {
        let start = utc(2026, 3, 1, 9, 0);
        let mut s = series(daily_master(start), "FREQ=DAILY;COUNT=3");
        s.exceptions.exclude(&EventTime::Utc { at: start });
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        let starts: Vec<_> = out.iter().map(|o| o.start_utc()).collect();
        assert_eq!(
            starts,
            vec![start + Duration::days(1), start + Duration::days(2)]
        );
    }

    #[test]
    fn test_zoned_exdate_is_read_in_its_own_zone() {
        // Series at 14:00Z; exclusion expressed as 09:00 New York (EST) on day 2.
        let start = utc(2026, 1, 10, 14, 0);
        let mut s = series(daily_master(start), "FREQ=DAILY;COUNT=3");
        let tz: Tz = "America/New_York".parse().unwrap();
        s.exceptions.exclude(&EventTime::Zoned {
            local: NaiveDate::from_ymd_opt(2026, 1, 11)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            tz,
        });
        let out = expand_series(&s, &window(utc(2026, 1, 10, 0, 0), 30)).unwrap();
        let starts: Vec<_> = out.iter().map(|o| o.start_utc()).collect();
        assert_eq!(starts, vec![start, start + Duration::days(2)]);
    }

    #[test]
    fn test_override_replaces_its_slot_only() {
        let start = utc(2026, 3, 1, 9, 0);
        let mut s = series(daily_master(start), "FREQ=DAILY;COUNT=3");
        let slot = start + Duration::days(1);
        let moved = Occurrence::new(
            "series-1",
            "Standup (moved)",
            EventTime::Utc {
                at: slot + Duration::hours(5),
            },
            Some(EventTime::Utc {
                at: slot + Duration::hours(6),
            }),
        );
        s.exceptions.add_override(&EventTime::Utc { at: slot }, moved);
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();

        assert_eq!(out.len(), 3);
        assert!(!out.iter().any(|o| o.start_utc() == slot));
        let replaced: Vec<_> = out
            .iter()
            .filter(|o| o.recurrence_id == Some(slot))
            .collect();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].subject, "Standup (moved)");
        assert_eq!(replaced[0].start_utc(), slot + Duration::hours(5));
    }

    #[test]
    fn test_override_in_other_zone_supersedes_slot() {
        let start = utc(2026, 3, 1, 9, 0);
        let mut s = series(daily_master(start), "FREQ=DAILY;COUNT=2");
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        // 20:00 Tokyo == 11:00Z on the same day.
        let local = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        let moved = Occurrence::new(
            "series-1",
            "Standup",
            EventTime::Zoned { local, tz },
            None,
        );
        s.exceptions.add_override(&EventTime::Utc { at: start }, moved);
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out[0].start_utc(), utc(2026, 3, 1, 11, 0));
        assert_eq!(out[0].recurrence_id, Some(start));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_weekly_series_keeps_wall_clock_across_dst() {
        // 09:00 New York every Friday; DST starts Sunday March 8, 2026.
        let tz: Tz = "America/New_York".parse().unwrap();
        let local = NaiveDate::from_ymd_opt(2026, 3, 6)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let master = Occurrence::new(
            "weekly",
            "Review",
            EventTime::Zoned { local, tz },
            Some(EventTime::Zoned {
                local: local + Duration::hours(1),
                tz,
            }),
        );
        let s = series(master, "FREQ=WEEKLY;COUNT=2");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out[0].start_utc(), utc(2026, 3, 6, 14, 0));
        assert_eq!(out[1].start_utc(), utc(2026, 3, 13, 13, 0));
        assert_eq!(out[1].end_utc(), Some(utc(2026, 3, 13, 14, 0)));
    }

    #[test]
    fn test_monthly_first_monday() {
        let start = utc(2026, 1, 5, 15, 0); // first Monday of January 2026
        let s = series(daily_master(start), "FREQ=MONTHLY;BYDAY=1MO;COUNT=3");
        let out = expand_series(&s, &window(utc(2026, 1, 1, 0, 0), 120)).unwrap();
        let starts: Vec<_> = out.iter().map(|o| o.start_utc()).collect();
        assert_eq!(
            starts,
            vec![
                utc(2026, 1, 5, 15, 0),
                utc(2026, 2, 2, 15, 0),
                utc(2026, 3, 2, 15, 0)
            ]
        );
    }

    #[test]
    fn test_interval_two_daily() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(daily_master(start), "FREQ=DAILY;INTERVAL=2;COUNT=3");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out[2].start_utc(), start + Duration::days(4));
    }

    #[test]
    fn test_all_day_series_stays_date_only() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let master = Occurrence::new(
            "bins",
            "Bin day",
            EventTime::Date { date, tz: Some(tz) },
            Some(EventTime::Date {
                date: date + Duration::days(1),
                tz: Some(tz),
            }),
        );
        let s = series(master, "FREQ=WEEKLY;COUNT=2");
        let out = expand_series(&s, &window(utc(2026, 5, 31, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.all_day && o.start.is_date_only()));
        assert_eq!(
            out[1].start,
            EventTime::Date {
                date: NaiveDate::from_ymd_opt(2026, 6, 8).unwrap(),
                tz: Some(tz)
            }
        );
        // Anchored at Berlin midnight (UTC+2 in June).
        assert_eq!(out[1].start_utc(), utc(2026, 6, 7, 22, 0));
    }

    #[test]
    fn test_date_only_exdate_matches_local_date() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let master = Occurrence::new("bins", "Bin day", EventTime::Date { date, tz: None }, None);
        let mut s = series(master, "FREQ=DAILY;COUNT=3");
        s.exceptions.exclude(&EventTime::Date {
            date: date + Duration::days(1),
            tz: None,
        });
        let out = expand_series(&s, &window(utc(2026, 5, 31, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_in_progress_occurrence_kept_past_ones_dropped() {
        let start = utc(2026, 3, 1, 9, 0);
        let s = series(daily_master(start), "FREQ=DAILY;COUNT=5");
        // 09:30 on day 3: day 3 is in progress, days 1-2 are over.
        let out = expand_series(&s, &window(utc(2026, 3, 3, 9, 30), 30)).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].start_utc(), utc(2026, 3, 3, 9, 0));
    }

    #[test]
    fn test_non_recurring_passes_through() {
        let occ = daily_master(utc(2026, 3, 1, 9, 30));
        let s = SeriesDefinition::single(occ.clone());
        let out = expand_series(&s, &window(utc(2026, 3, 1, 8, 45), 30)).unwrap();
        assert_eq!(out, vec![occ]);
        let later = expand_series(&s, &window(utc(2026, 4, 1, 0, 0), 30)).unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_orphan_override_emitted_when_in_window() {
        let start = utc(2026, 3, 1, 9, 0);
        let mut s = series(daily_master(start), "FREQ=DAILY;COUNT=2");
        // Points at a slot beyond COUNT, moved into the window.
        let rid = start + Duration::days(10);
        let moved = daily_master(start + Duration::days(3));
        s.exceptions.add_override(&EventTime::Utc { at: rid }, moved);
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].recurrence_id, Some(rid));
    }

    #[test]
    fn test_open_ended_series_from_old_start_matches_full_walk() {
        // Appending a COUNT that is never reached disables the start shift,
        // giving a slot-by-slot reference to compare against.
        let cases = [
            (utc(2000, 1, 1, 9, 0), "FREQ=DAILY;INTERVAL=3"),
            (utc(1960, 1, 7, 8, 30), "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH"),
            (utc(1990, 1, 31, 12, 0), "FREQ=MONTHLY"),
            (utc(1990, 3, 3, 12, 0), "FREQ=MONTHLY;INTERVAL=5;BYDAY=-1FR"),
        ];
        let w = window(utc(2026, 3, 15, 0, 0), 60);
        for (start, rule) in cases {
            let fast = expand_series(&series(daily_master(start), rule), &w).unwrap();
            let full = expand_series(
                &series(daily_master(start), &format!("{rule};COUNT=1000000")),
                &w,
            )
            .unwrap();
            assert!(!fast.is_empty(), "{rule}");
            assert_eq!(fast, full, "{rule}");
        }
    }

    #[test]
    fn test_year_one_start_expands_only_the_window() {
        let s = series(daily_master(utc(1, 1, 1, 9, 0)), "FREQ=DAILY");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert_eq!(out.len(), 30);
        assert_eq!(out[0].start_utc(), utc(2026, 3, 1, 9, 0));
        assert_eq!(out[0].recurrence_id, Some(utc(2026, 3, 1, 9, 0)));
    }

    #[test]
    fn test_slot_ceiling_stops_counted_series() {
        // ~13 000 daily slots lie between 1990 and the window; the walk
        // stops at the ceiling instead of reaching it.
        let s = series(daily_master(utc(1990, 1, 1, 9, 0)), "FREQ=DAILY;COUNT=1000000");
        let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30)).unwrap();
        assert!(out.is_empty());

        let s = series(daily_master(utc(1, 1, 1, 9, 0)), "FREQ=DAILY;COUNT=100000");
        assert!(expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 30))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_window_end_saturates() {
        let w = ExpansionWindow::from_now(utc(2026, 3, 1, 0, 0), u32::MAX);
        assert_eq!(w.end, DateTime::<Utc>::MAX_UTC);
    }

    // ── properties ──────────────────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_count_yields_strictly_increasing(count in 1u32..60, horizon in 1u32..90) {
            let start = utc(2026, 3, 1, 9, 0);
            let s = series(daily_master(start), &format!("FREQ=DAILY;COUNT={count}"));
            let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), horizon)).unwrap();
            // Day k starts at 09:00 and fits while k <= horizon - 1 (window opens at 00:00).
            let expected = count.min(horizon) as usize;
            prop_assert_eq!(out.len(), expected);
            for pair in out.windows(2) {
                prop_assert!(pair[0].start_utc() < pair[1].start_utc());
            }
        }

        #[test]
        fn prop_until_bounds_all_instants(count in 1u32..40, until_day in 1u32..28) {
            let start = utc(2026, 3, 1, 9, 0);
            let rule = format!("FREQ=DAILY;COUNT={count};UNTIL=202603{until_day:02}T090000Z");
            let s = series(daily_master(start), &rule);
            let out = expand_series(&s, &window(utc(2026, 3, 1, 0, 0), 60)).unwrap();
            let until = utc(2026, 3, until_day, 9, 0);
            prop_assert!(out.iter().all(|o| o.start_utc() <= until));
            prop_assert_eq!(out.len(), count.min(until_day) as usize);
        }
    }
}
