//! Per-source parse telemetry and the duplicate-flood circuit breaker.
//!
//! Some upstream feeds get stuck emitting the same event over and over. One
//! [`ParserTelemetry`] lives for exactly one parse pass over one source and
//! decides when that pass should be abandoned.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::BreakerThresholds;

/// How bad a tripped breaker looked. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakerSeverity {
    Medium,
    High,
}

impl fmt::Display for BreakerSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerSeverity::Medium => "MEDIUM",
            BreakerSeverity::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParserTelemetry {
    source: String,
    thresholds: BreakerThresholds,
    total_items: u64,
    unique_keys: HashSet<(String, Option<DateTime<Utc>>)>,
    warnings: u64,
}

/// Point-in-time counters, for logs and status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub source: String,
    pub total_items: u64,
    pub unique_items: u64,
    pub duplicate_items: u64,
    pub duplicate_ratio: f64,
    pub warnings: u64,
}

impl ParserTelemetry {
    pub fn new(source: impl Into<String>, thresholds: BreakerThresholds) -> Self {
        Self {
            source: source.into(),
            thresholds,
            total_items: 0,
            unique_keys: HashSet::new(),
            warnings: 0,
        }
    }

    /// Count one parsed record. Returns `true` when `(uid, recurrence_id)`
    /// has been seen before in this pass; a repeat also counts as a warning.
    pub fn record_event(&mut self, uid: &str, recurrence_id: Option<DateTime<Utc>>) -> bool {
        self.total_items += 1;
        let is_duplicate = !self.unique_keys.insert((uid.to_string(), recurrence_id));
        if is_duplicate {
            self.warnings += 1;
        }
        is_duplicate
    }

    /// Count a non-duplicate problem (undecodable start, bad exception date).
    pub fn record_warning(&mut self) {
        self.warnings += 1;
    }

    /// True only when the warning count *and* the duplicate ratio are both
    /// over their thresholds. Large feeds of unique events never trip it.
    pub fn should_break(&self) -> bool {
        self.warnings > u64::from(self.thresholds.max_warnings)
            && self.duplicate_ratio() > self.thresholds.duplicate_ratio_threshold
    }

    pub fn severity(&self) -> BreakerSeverity {
        if self.duplicate_ratio() > 50.0 {
            BreakerSeverity::High
        } else {
            BreakerSeverity::Medium
        }
    }

    /// Duplicates as a percentage of all records; 0.0 before any record.
    pub fn duplicate_ratio(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.duplicate_count() as f64 / self.total_items as f64 * 100.0
    }

    pub fn duplicate_count(&self) -> u64 {
        self.total_items - self.unique_count()
    }

    pub fn unique_count(&self) -> u64 {
        self.unique_keys.len() as u64
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            source: self.source.clone(),
            total_items: self.total_items,
            unique_items: self.unique_count(),
            duplicate_items: self.duplicate_count(),
            duplicate_ratio: self.duplicate_ratio(),
            warnings: self.warnings,
        }
    }
}
