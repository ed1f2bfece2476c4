//! Bounded-concurrency fetching across all configured sources.
//!
//! Each source runs as its own task, gated by a semaphore so that at most
//! `concurrency` fetches are in flight on the kiosk at once. A single
//! deadline covers the whole batch: anything still running when it passes is
//! abandoned (its task detached and its eventual result dropped) and the
//! batch returns whatever succeeded. A failing source never fails the batch.
//!
//! Retries and backoff belong to the [`FeedFetcher`] implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{ValidatedConfig, MAX_FETCH_CONCURRENCY};
use crate::error::{EngineError, Result};
use crate::expander::ExpansionWindow;
use crate::model::{Occurrence, RawEvent};
use crate::source::{parse_source, CalendarSource};

/// The seam to the HTTP + tokenizer collaborator.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Download one source and return its tokenized event records.
    async fn fetch(&self, source: &CalendarSource) -> Result<Vec<RawEvent>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of one batch. Zero successes is a normal outcome, not an error.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub occurrences: Vec<Occurrence>,
    pub succeeded: Vec<String>,
    pub failed: Vec<SourceFailure>,
    /// Set when the batch deadline cut off at least one source.
    pub timed_out: bool,
}

impl FetchReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Run `fetch_one` for every enabled source with at most `concurrency` in
/// flight, bounded overall by `deadline`.
///
/// `concurrency` is clamped to `1..=3`.
pub async fn fetch_all<F, Fut>(
    sources: &[CalendarSource],
    concurrency: usize,
    deadline: Duration,
    fetch_one: F,
) -> FetchReport
where
    F: Fn(CalendarSource) -> Fut,
    Fut: Future<Output = Result<Vec<Occurrence>>> + Send + 'static,
{
    let mut report = FetchReport::default();
    let semaphore = Arc::new(Semaphore::new(concurrency.clamp(1, MAX_FETCH_CONCURRENCY)));
    let mut tasks = JoinSet::new();
    let mut outstanding: BTreeMap<usize, String> = BTreeMap::new();

    for (idx, source) in sources.iter().enumerate().filter(|(_, s)| s.enabled) {
        let name = source.name.clone();
        let permits = Arc::clone(&semaphore);
        let work = fetch_one(source.clone());
        let span = tracing::info_span!("fetch_source", source = %name);
        outstanding.insert(idx, name.clone());

        tasks.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (
                        idx,
                        Err(EngineError::Fetch {
                            source_name: name,
                            message: "concurrency gate closed".to_string(),
                        }),
                    );
                };
                (idx, work.await)
            }
            .instrument(span),
        );
    }

    if outstanding.is_empty() {
        tracing::info!("no enabled calendar sources");
        return report;
    }

    let deadline_at = tokio::time::Instant::now() + deadline;
    loop {
        match tokio::time::timeout_at(deadline_at, tasks.join_next()).await {
            Ok(Some(Ok((idx, result)))) => {
                let Some(name) = outstanding.remove(&idx) else {
                    continue;
                };
                match result {
                    Ok(occurrences) => {
                        tracing::info!(source = %name, count = occurrences.len(), "source fetched");
                        report.occurrences.extend(occurrences);
                        report.succeeded.push(name);
                    }
                    Err(e) => {
                        tracing::warn!(source = %name, error = %e, "source failed, excluding from this cycle");
                        report.failed.push(SourceFailure {
                            source: name,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Ok(Some(Err(join_err))) => {
                // Attributed to its source once the batch drains.
                tracing::warn!(error = %join_err, "source task aborted");
            }
            Ok(None) => break,
            Err(_) => {
                report.timed_out = true;
                tasks.detach_all();
                break;
            }
        }
    }

    let reason = if report.timed_out {
        EngineError::Timeout(deadline.as_secs()).to_string()
    } else {
        "source task panicked".to_string()
    };
    for (_, name) in outstanding {
        tracing::warn!(source = %name, %reason, "source abandoned");
        report.failed.push(SourceFailure {
            source: name,
            reason: reason.clone(),
        });
    }

    tracing::info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        occurrences = report.occurrences.len(),
        "fetch batch complete"
    );
    report
}

/// Fetch every source through `fetcher`, then parse and expand each one on
/// the blocking pool.
pub async fn fetch_and_expand(
    sources: &[CalendarSource],
    fetcher: Arc<dyn FeedFetcher>,
    config: &ValidatedConfig,
    now: DateTime<Utc>,
) -> FetchReport {
    let window = ExpansionWindow::from_now(now, config.rrule_expansion_days());
    let thresholds = config.breaker_thresholds();

    fetch_all(
        sources,
        config.fetch_concurrency(),
        config.fetch_deadline(),
        move |source| {
            let fetcher = Arc::clone(&fetcher);
            async move {
                let records = fetcher.fetch(&source).await?;
                // Expansion is CPU-bound; keep it off the runtime threads so the
                // batch deadline can still fire.
                let name = source.name.clone();
                tokio::task::spawn_blocking(move || {
                    parse_source(&source.name, &records, &window, thresholds)
                })
                .await
                .map_err(|e| EngineError::Fetch {
                    source_name: name,
                    message: format!("parse task failed: {e}"),
                })?
            }
        },
    )
    .await
}
