//! Decoding of tokenized calendar property values.
//!
//! The tokenizer upstream hands over property values as plain strings plus
//! an optional `TZID` parameter. This module turns them into [`EventTime`]s
//! and durations. Anything that cannot be decoded unambiguously is an error;
//! an incorrect date is worse than a missing one.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::error::{EngineError, Result};
use crate::model::{EventTime, RawValue};

/// Parse an IANA zone name.
pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(s.to_string()))
}

/// Decode one property value.
///
/// Accepted forms:
/// - `20260301` (date; `date_only` forces this interpretation)
/// - `20260301T090000Z` (UTC)
/// - `20260301T090000` (floating, or zoned when `tzid` is present)
/// - RFC 3339 (`2026-03-01T09:00:00-05:00`), resolved to UTC
///
/// # Errors
///
/// [`EngineError::InvalidDatetime`] for malformed values and
/// [`EngineError::InvalidTimezone`] for unknown `TZID`s.
///
/// # Examples
///
/// ```
/// use agenda_engine::ical::parse_event_time;
/// use agenda_engine::model::{EventTime, RawValue};
/// use chrono::{TimeZone, Utc};
///
/// let zoned = parse_event_time(&RawValue::zoned("20260302T090000", "America/New_York"), false)?;
/// assert!(matches!(zoned, EventTime::Zoned { .. }));
/// assert_eq!(zoned.to_utc(), Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap());
///
/// let day = parse_event_time(&RawValue::new("20260305"), false)?;
/// assert!(matches!(day, EventTime::Date { tz: None, .. }));
///
/// assert!(parse_event_time(&RawValue::zoned("20260302T090000", "Mars/Olympus"), false).is_err());
/// # Ok::<(), agenda_engine::EngineError>(())
/// ```
pub fn parse_event_time(raw: &RawValue, date_only: bool) -> Result<EventTime> {
    let value = raw.value.trim();
    let tz = raw.tzid.as_deref().map(parse_timezone).transpose()?;

    if date_only || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())) {
        let date_part = value.get(..8).unwrap_or(value);
        let date = NaiveDate::parse_from_str(date_part, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
            .map_err(|_| EngineError::InvalidDatetime(value.to_string()))?;
        return Ok(EventTime::Date { date, tz });
    }

    if let Some(stripped) = value.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
            return Ok(EventTime::Utc {
                at: naive.and_utc(),
            });
        }
    }

    if let Ok(local) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(match tz {
            Some(tz) => EventTime::Zoned { local, tz },
            None => EventTime::Floating { local },
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(EventTime::Utc {
            at: dt.with_timezone(&Utc),
        });
    }

    Err(EngineError::InvalidDatetime(value.to_string()))
}

/// Split an EXDATE property that may carry several comma-separated values.
pub fn split_multi_value(raw: &RawValue) -> Vec<RawValue> {
    raw.value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| RawValue {
            value: v.to_string(),
            tzid: raw.tzid.clone(),
        })
        .collect()
}

/// Parse an ISO 8601 / RFC 5545 duration: `[+-]P[nW][nD][T[nH][nM][nS]]`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidDuration`] if the string is empty, lacks the
/// `P` designator, contains an unknown component, or does not fit in a
/// [`Duration`].
///
/// # Examples
///
/// ```
/// use agenda_engine::ical::parse_duration;
/// use chrono::Duration;
///
/// assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::minutes(90));
/// assert_eq!(parse_duration("-P1D").unwrap(), Duration::days(-1));
/// assert!(parse_duration("P99999999999999W").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let err = || EngineError::InvalidDuration(s.to_string());

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let rest = rest.strip_prefix('P').ok_or_else(err)?;
    if rest.is_empty() {
        return Err(err());
    }

    let mut total = Duration::zero();
    let mut in_time = false;
    let mut num = String::new();
    let mut saw_component = false;

    for c in rest.chars() {
        match c {
            '0'..='9' => num.push(c),
            'T' if !in_time && num.is_empty() => in_time = true,
            unit => {
                let n: i64 = num.parse().map_err(|_| err())?;
                num.clear();
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => return Err(err()),
                };
                total = part
                    .and_then(|part| total.checked_add(&part))
                    .ok_or_else(err)?;
                saw_component = true;
            }
        }
    }

    if !num.is_empty() || !saw_component {
        return Err(err());
    }
    Ok(total * sign)
}
