//! Typed engine configuration.
//!
//! The engine never reads the environment or the filesystem for its settings;
//! the host process deserializes an [`EngineConfig`] however it likes and
//! passes the validated result in explicitly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Upper bound on parallel source fetches. Kiosk hardware cannot take more.
pub const MAX_FETCH_CONCURRENCY: usize = 3;

/// Ten years, leap days included.
pub const MAX_EXPANSION_DAYS: u32 = 3660;
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;
pub const MAX_SKIP_TTL_HOURS: i64 = 366 * 24;
pub const MAX_GROUPING_WINDOW_SECONDS: i64 = 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "d_rrule_expansion_days")]
    pub rrule_expansion_days: u32,
    #[serde(default = "d_event_window_size")]
    pub event_window_size: usize,
    #[serde(default = "d_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    #[serde(default = "d_fetch_deadline_seconds")]
    pub fetch_deadline_seconds: u64,
    #[serde(default = "d_max_warnings")]
    pub max_warnings: u32,
    #[serde(default = "d_duplicate_ratio_threshold")]
    pub duplicate_ratio_threshold: f64,
    #[serde(default = "d_skip_ttl_hours")]
    pub skip_ttl_hours: i64,
    #[serde(default = "d_grouping_window_seconds")]
    pub grouping_window_seconds: i64,
}

fn d_fetch_concurrency() -> usize {
    3
}
fn d_rrule_expansion_days() -> u32 {
    30
}
fn d_event_window_size() -> usize {
    50
}
fn d_refresh_interval_seconds() -> u64 {
    300
}
fn d_fetch_deadline_seconds() -> u64 {
    120
}
fn d_max_warnings() -> u32 {
    50
}
fn d_duplicate_ratio_threshold() -> f64 {
    10.0
}
fn d_skip_ttl_hours() -> i64 {
    24
}
fn d_grouping_window_seconds() -> i64 {
    1800
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: d_fetch_concurrency(),
            rrule_expansion_days: d_rrule_expansion_days(),
            event_window_size: d_event_window_size(),
            refresh_interval_seconds: d_refresh_interval_seconds(),
            fetch_deadline_seconds: d_fetch_deadline_seconds(),
            max_warnings: d_max_warnings(),
            duplicate_ratio_threshold: d_duplicate_ratio_threshold(),
            skip_ttl_hours: d_skip_ttl_hours(),
            grouping_window_seconds: d_grouping_window_seconds(),
        }
    }
}

/// Thresholds handed to each per-source parse session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerThresholds {
    pub max_warnings: u32,
    pub duplicate_ratio_threshold: f64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            max_warnings: d_max_warnings(),
            duplicate_ratio_threshold: d_duplicate_ratio_threshold(),
        }
    }
}

/// An [`EngineConfig`] whose fields have been range-checked.
///
/// Only obtainable through [`EngineConfig::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    inner: EngineConfig,
}

impl EngineConfig {
    /// Check every field and clamp `fetch_concurrency` into `1..=3`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for zero-sized windows, zero
    /// intervals, a negative or non-finite duplicate threshold, or any
    /// duration above its `MAX_*` bound.
    pub fn validate(mut self) -> Result<ValidatedConfig> {
        if self.rrule_expansion_days == 0 {
            return Err(EngineError::InvalidConfig(
                "rrule_expansion_days must be at least 1".to_string(),
            ));
        }
        if self.event_window_size == 0 {
            return Err(EngineError::InvalidConfig(
                "event_window_size must be at least 1".to_string(),
            ));
        }
        if self.refresh_interval_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "refresh_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.fetch_deadline_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "fetch_deadline_seconds must be at least 1".to_string(),
            ));
        }
        if self.rrule_expansion_days > MAX_EXPANSION_DAYS {
            return Err(EngineError::InvalidConfig(format!(
                "rrule_expansion_days must be at most {MAX_EXPANSION_DAYS}, got {}",
                self.rrule_expansion_days
            )));
        }
        if self.refresh_interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(EngineError::InvalidConfig(format!(
                "refresh_interval_seconds must be at most {MAX_INTERVAL_SECONDS}, got {}",
                self.refresh_interval_seconds
            )));
        }
        if self.fetch_deadline_seconds > MAX_INTERVAL_SECONDS {
            return Err(EngineError::InvalidConfig(format!(
                "fetch_deadline_seconds must be at most {MAX_INTERVAL_SECONDS}, got {}",
                self.fetch_deadline_seconds
            )));
        }
        if !self.duplicate_ratio_threshold.is_finite() || self.duplicate_ratio_threshold < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate_ratio_threshold must be a non-negative number, got {}",
                self.duplicate_ratio_threshold
            )));
        }
        if !(1..=MAX_SKIP_TTL_HOURS).contains(&self.skip_ttl_hours) {
            return Err(EngineError::InvalidConfig(format!(
                "skip_ttl_hours must be between 1 and {MAX_SKIP_TTL_HOURS}, got {}",
                self.skip_ttl_hours
            )));
        }
        if !(0..=MAX_GROUPING_WINDOW_SECONDS).contains(&self.grouping_window_seconds) {
            return Err(EngineError::InvalidConfig(format!(
                "grouping_window_seconds must be between 0 and {MAX_GROUPING_WINDOW_SECONDS}, got {}",
                self.grouping_window_seconds
            )));
        }

        let clamped = self.fetch_concurrency.clamp(1, MAX_FETCH_CONCURRENCY);
        if clamped != self.fetch_concurrency {
            tracing::warn!(
                requested = self.fetch_concurrency,
                clamped,
                "fetch_concurrency out of range, clamping"
            );
            self.fetch_concurrency = clamped;
        }

        Ok(ValidatedConfig { inner: self })
    }
}

impl ValidatedConfig {
    pub fn fetch_concurrency(&self) -> usize {
        self.inner.fetch_concurrency
    }

    pub fn rrule_expansion_days(&self) -> u32 {
        self.inner.rrule_expansion_days
    }

    pub fn event_window_size(&self) -> usize {
        self.inner.event_window_size
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.inner.refresh_interval_seconds)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.inner.fetch_deadline_seconds)
    }

    pub fn breaker_thresholds(&self) -> BreakerThresholds {
        BreakerThresholds {
            max_warnings: self.inner.max_warnings,
            duplicate_ratio_threshold: self.inner.duplicate_ratio_threshold,
        }
    }

    pub fn skip_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.inner.skip_ttl_hours)
    }

    pub fn grouping_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inner.grouping_window_seconds)
    }

    pub fn as_config(&self) -> &EngineConfig {
        &self.inner
    }
}
