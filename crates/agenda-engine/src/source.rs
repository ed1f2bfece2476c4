//! One parse session over one source's tokenized records.
//!
//! Records are counted by a fresh [`ParserTelemetry`] as they stream in; the
//! moment its breaker trips the whole source is abandoned and nothing it
//! produced so far is kept. Surviving records are grouped into series
//! (master + RECURRENCE-ID overrides sharing a uid) and expanded.

use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::BreakerThresholds;
use crate::error::{EngineError, Result};
use crate::expander::{
    align_recurrence_id, expand_series, ExceptionSet, ExpansionWindow, RecurrenceRule,
    SeriesDefinition,
};
use crate::ical::{parse_duration, parse_event_time, split_multi_value};
use crate::model::{EventTime, Occurrence, RawEvent};
use crate::telemetry::ParserTelemetry;

/// A configured calendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSource {
    pub name: String,
    pub url: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

fn d_true() -> bool {
    true
}

impl CalendarSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }
}

/// Decode a single record into a standalone occurrence (no recurrence applied).
///
/// End resolution: `DTEND` wins, then `DTSTART + DURATION`, then one day for
/// date-only starts; otherwise the event has no end.
pub fn occurrence_from_raw(raw: &RawEvent, source: &str) -> Result<Occurrence> {
    let start = parse_event_time(&raw.dtstart, raw.all_day)?;
    let date_only = raw.all_day || start.is_date_only();

    let out_of_range = |what: &str| {
        EngineError::InvalidDuration(format!("{what} from {} is out of range", start.to_utc()))
    };
    let end = match (&raw.dtend, &raw.duration) {
        (Some(dtend), _) => Some(parse_event_time(dtend, date_only)?),
        (None, Some(duration)) => Some(
            start
                .shifted(parse_duration(duration)?)
                .ok_or_else(|| out_of_range(duration))?,
        ),
        (None, None) if date_only => Some(
            start
                .shifted(Duration::days(1))
                .ok_or_else(|| out_of_range("P1D"))?,
        ),
        (None, None) => None,
    };

    let mut occ = Occurrence::new(raw.uid.clone(), raw.summary.clone(), start, end)
        .with_categories(raw.categories.clone())
        .with_source(source);
    occ.location = raw.location.clone().filter(|l| !l.trim().is_empty());
    occ.transparent = raw.transparent;
    Ok(occ)
}

/// Parse and expand one source's records.
///
/// # Errors
///
/// Returns [`EngineError::CircuitOpen`] as soon as the duplicate-flood
/// breaker trips. Malformed individual series are logged and left out; they
/// never fail the source.
pub fn parse_source(
    source: &str,
    records: &[RawEvent],
    window: &ExpansionWindow,
    thresholds: BreakerThresholds,
) -> Result<Vec<Occurrence>> {
    let mut telemetry = ParserTelemetry::new(source, thresholds);
    let mut masters: Vec<&RawEvent> = Vec::new();
    let mut overrides: HashMap<&str, Vec<(EventTime, &RawEvent)>> = HashMap::new();

    for record in records {
        let recurrence_id = match &record.recurrence_id {
            Some(raw) => match parse_event_time(raw, record.all_day) {
                Ok(rid) => Some(rid),
                Err(e) => {
                    tracing::warn!(source, uid = %record.uid, error = %e, "undecodable RECURRENCE-ID, skipping record");
                    telemetry.record_warning();
                    check_breaker(&telemetry)?;
                    continue;
                }
            },
            None => None,
        };

        let duplicate = telemetry.record_event(&record.uid, recurrence_id.as_ref().map(EventTime::to_utc));
        check_breaker(&telemetry)?;
        if duplicate {
            continue;
        }

        match recurrence_id {
            Some(rid) => overrides
                .entry(record.uid.as_str())
                .or_default()
                .push((rid, record)),
            None => masters.push(record),
        }
    }

    let mut out = Vec::new();
    for master in masters {
        let moved = overrides.remove(master.uid.as_str()).unwrap_or_default();
        match build_series(master, &moved, source) {
            Ok(series) => match expand_series(&series, window) {
                Ok(occs) => out.extend(occs),
                Err(e) => {
                    tracing::warn!(source, uid = %master.uid, error = %e, "expansion failed, excluding series");
                    telemetry.record_warning();
                }
            },
            Err(e) => {
                tracing::warn!(source, uid = %master.uid, error = %e, "malformed series, excluding");
                telemetry.record_warning();
            }
        }
    }

    // Overrides whose master never arrived are shown as they are.
    for (uid, moved) in overrides {
        for (rid, record) in moved {
            match occurrence_from_raw(record, source) {
                Ok(occ) => {
                    let occ = occ.with_recurrence_id(rid.to_utc());
                    if window.contains(&occ) {
                        out.push(occ);
                    }
                }
                Err(e) => {
                    tracing::warn!(source, uid, error = %e, "malformed orphan override, skipping");
                    telemetry.record_warning();
                }
            }
        }
    }

    tracing::debug!(
        source,
        total = telemetry.total_items(),
        unique = telemetry.unique_count(),
        duplicates = telemetry.duplicate_count(),
        warnings = telemetry.warnings(),
        occurrences = out.len(),
        "parsed source"
    );

    Ok(out)
}

fn check_breaker(telemetry: &ParserTelemetry) -> Result<()> {
    if telemetry.should_break() {
        let severity = telemetry.severity();
        tracing::error!(
            source = telemetry.source(),
            %severity,
            duplicate_ratio = telemetry.duplicate_ratio(),
            warnings = telemetry.warnings(),
            total = telemetry.total_items(),
            "circuit breaker tripped, abandoning source"
        );
        return Err(EngineError::CircuitOpen {
            source_name: telemetry.source().to_string(),
            severity,
            duplicate_ratio: telemetry.duplicate_ratio(),
        });
    }
    Ok(())
}

fn build_series(
    master: &RawEvent,
    moved: &[(EventTime, &RawEvent)],
    source: &str,
) -> Result<SeriesDefinition> {
    let template = occurrence_from_raw(master, source)?;

    let rule = master
        .rrule
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .map(RecurrenceRule::parse)
        .transpose()?;

    let mut exceptions = ExceptionSet::new();
    for exdate in master.exdates.iter().flat_map(split_multi_value) {
        let at = parse_event_time(&exdate, master.all_day).map_err(|e| {
            EngineError::InvalidDatetime(format!("EXDATE '{}': {e}", exdate.value))
        })?;
        exceptions.exclude(&at);
    }

    for (rid, record) in moved {
        let replacement = occurrence_from_raw(record, source)?;
        let rid = align_recurrence_id(rid.clone(), &template.start);
        exceptions.add_override(&rid, replacement);
    }

    Ok(SeriesDefinition {
        master: template,
        rule,
        exceptions,
    })
}
