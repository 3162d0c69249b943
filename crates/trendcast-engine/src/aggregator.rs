//! Periodic window pass over all accumulated themes.
//!
//! Windowing is a full rescan on a fixed cadence rather than incremental
//! maintenance, so the trending set is at most one cadence stale. Each pass
//! is one atomic store operation that evicts expired themes and swaps in a
//! freshly staged ranked set.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use trendcast_core::WindowPolicy;
use trendcast_store::StatsStore;

use crate::error::EngineError;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationResult {
    pub processed_themes: usize,
    pub ranked: usize,
    pub evicted: usize,
    pub malformed: usize,
}

pub struct WindowAggregator {
    store: Arc<dyn StatsStore>,
    policy: WindowPolicy,
    // Held for the duration of a pass; passes must never interleave.
    in_flight: Mutex<()>,
}

impl WindowAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn StatsStore>, policy: WindowPolicy) -> Self {
        Self {
            store,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Run one pass evaluated at `now`, waiting for any pass already running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the rebuild fails; the previous
    /// ranked set is left untouched in that case.
    pub async fn run_pass(&self, now: i64) -> Result<AggregationResult, EngineError> {
        let _guard = self.in_flight.lock().await;
        self.rebuild(now).await
    }

    /// Run one pass unless another is still in flight, in which case this
    /// tick is skipped and `None` is returned.
    pub async fn try_run_pass(&self, now: i64) -> Option<Result<AggregationResult, EngineError>> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::warn!("aggregator: previous pass still running; skipping tick");
            return None;
        };
        Some(self.rebuild(now).await)
    }

    /// Scheduled entry point: one non-overlapping pass at the current time.
    ///
    /// Failures are logged and left for the next tick. If shutdown fires
    /// mid-pass the pass is abandoned; the store-side rebuild is atomic, so
    /// it either landed completely or not at all.
    pub async fn tick(&self, shutdown: &Shutdown) -> Option<AggregationResult> {
        if shutdown.is_triggered() {
            return None;
        }
        let mut shutdown = shutdown.clone();
        tokio::select! {
            outcome = self.try_run_pass(crate::unix_now()) => match outcome {
                Some(Ok(result)) => Some(result),
                Some(Err(e)) => {
                    tracing::error!(error = %e, "aggregator: pass failed; retrying at next tick");
                    None
                }
                None => None,
            },
            () = shutdown.wait() => {
                tracing::info!("aggregator: shutdown requested; abandoning pass");
                None
            }
        }
    }

    async fn rebuild(&self, now: i64) -> Result<AggregationResult, EngineError> {
        tracing::debug!(policy = %self.policy, now, "aggregator: starting pass");
        let report = self.store.rebuild_trending(self.policy, now).await?;

        for theme in &report.malformed {
            tracing::warn!(theme = %theme, "aggregator: skipped malformed stats entry");
        }

        let result = AggregationResult {
            processed_themes: report.processed_themes,
            ranked: report.ranked,
            evicted: report.evicted,
            malformed: report.malformed.len(),
        };
        tracing::info!(
            processed = result.processed_themes,
            ranked = result.ranked,
            evicted = result.evicted,
            malformed = result.malformed,
            "aggregator: pass complete"
        );
        Ok(result)
    }
}
