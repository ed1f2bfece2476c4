//! Error types for agenda-engine operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::telemetry::BreakerSeverity;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Expansion error: {0}")]
    Expansion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Circuit breaker open for source '{source_name}' ({severity}, duplicate ratio {duplicate_ratio:.1}%)"
    )]
    CircuitOpen {
        source_name: String,
        severity: BreakerSeverity,
        duplicate_ratio: f64,
    },

    #[error("Fetch failed for source '{source_name}': {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    #[error("Fetch batch exceeded its {0}s deadline")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures of the skip store's mutating calls.
///
/// The in-memory state has already been rolled back when one of these is returned.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to persist skip store to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize skip store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Skip store task did not complete: {0}")]
    Task(String),
}
