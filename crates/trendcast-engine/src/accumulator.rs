//! Merges sentiment observations into per-theme stats.
//!
//! Each merge is a single atomic store operation, so concurrent callers
//! never lose updates and need no coordination here. Merging does not wake
//! the publisher; new stats become visible at the next aggregation pass.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use trendcast_core::{
    AppConfig, Observation, ObservationMessage, ScoreBounds, MAX_CLOCK_SKEW_SECS,
};
use trendcast_store::{MergeOutcome, StatsStore};

use crate::error::EngineError;
use crate::retry::retry_with_backoff;

const MAX_THEME_LEN: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct AccumulatorSettings {
    pub score_bounds: ScoreBounds,
    /// How long an observation id is remembered for deduplication.
    pub dedup_ttl: Duration,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl AccumulatorSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            score_bounds: config.score_bounds,
            dedup_ttl: Duration::from_secs(config.dedup_ttl_secs),
            max_retries: config.merge_max_retries,
            ..Self::default()
        }
    }
}

impl Default for AccumulatorSettings {
    fn default() -> Self {
        Self {
            score_bounds: ScoreBounds::default(),
            dedup_ttl: Duration::from_secs(3600),
            max_retries: 3,
            backoff_base_ms: 200,
        }
    }
}

/// Per-message tally returned by [`Accumulator::merge_message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    pub applied: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Accumulator {
    store: Arc<dyn StatsStore>,
    settings: AccumulatorSettings,
}

impl Accumulator {
    #[must_use]
    pub fn new(store: Arc<dyn StatsStore>, settings: AccumulatorSettings) -> Self {
        Self { store, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &AccumulatorSettings {
        &self.settings
    }

    /// Merge one observation with a single store attempt.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidObservation`] for a blank, padded or
    /// oversized theme, an out-of-scale score, or an event time too far in
    /// the future, and [`EngineError::Store`] when the
    /// store call fails. A failure after the store applied the merge can
    /// over-count on retry unless the observation carries an id.
    pub async fn merge(&self, observation: &Observation) -> Result<MergeOutcome, EngineError> {
        self.validate(observation)?;
        let outcome = self
            .store
            .merge(observation, self.settings.dedup_ttl)
            .await?;
        Ok(outcome)
    }

    /// Like [`Accumulator::merge`], retrying transient store failures with
    /// back-off.
    ///
    /// # Errors
    ///
    /// Returns the validation error immediately, or the last store error
    /// once the retry budget is spent.
    pub async fn merge_with_retry(
        &self,
        observation: &Observation,
    ) -> Result<MergeOutcome, EngineError> {
        self.validate(observation)?;
        let outcome = retry_with_backoff(
            self.settings.max_retries,
            self.settings.backoff_base_ms,
            || self.store.merge(observation, self.settings.dedup_ttl),
        )
        .await?;
        Ok(outcome)
    }

    /// Merge every theme of one upstream message.
    ///
    /// Failures are isolated per theme: a rejected or failed theme is logged
    /// and counted, and the remaining themes are still merged.
    pub async fn merge_message(
        &self,
        message: ObservationMessage,
        received_at: i64,
    ) -> MessageReport {
        let mut report = MessageReport::default();
        if message.is_empty() {
            tracing::debug!("accumulator: discarding empty message");
            return report;
        }

        for observation in message.into_observations(received_at) {
            match self.merge_with_retry(&observation).await {
                Ok(MergeOutcome::Applied { .. }) => report.applied += 1,
                Ok(MergeOutcome::Duplicate) => {
                    tracing::debug!(
                        theme = %observation.theme,
                        id = ?observation.observation_id,
                        "accumulator: duplicate observation skipped"
                    );
                    report.duplicates += 1;
                }
                Err(EngineError::InvalidObservation(reason)) => {
                    tracing::warn!(theme = %observation.theme, %reason, "accumulator: observation rejected");
                    report.rejected += 1;
                }
                Err(e) => {
                    tracing::error!(theme = %observation.theme, error = %e, "accumulator: merge failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn validate(&self, observation: &Observation) -> Result<(), EngineError> {
        let theme = observation.theme.trim();
        if theme.is_empty() {
            return Err(EngineError::InvalidObservation(
                "theme must be non-empty".to_string(),
            ));
        }
        if theme != observation.theme {
            return Err(EngineError::InvalidObservation(
                "theme has surrounding whitespace".to_string(),
            ));
        }
        if theme.chars().count() > MAX_THEME_LEN {
            return Err(EngineError::InvalidObservation(format!(
                "theme exceeds {MAX_THEME_LEN} characters"
            )));
        }
        let bounds = self.settings.score_bounds;
        if !bounds.contains(observation.score) {
            return Err(EngineError::InvalidObservation(format!(
                "score {} outside {}..={}",
                observation.score, bounds.min, bounds.max
            )));
        }
        let latest = crate::unix_now().saturating_add(MAX_CLOCK_SKEW_SECS);
        if observation.observed_at > latest {
            return Err(EngineError::InvalidObservation(format!(
                "observed_at {} is ahead of the clock",
                observation.observed_at
            )));
        }
        Ok(())
    }
}
