//! Stats store capability for trendcast.
//!
//! [`StatsStore`] is the only way the engine touches shared state. Each
//! method is one self-contained atomic operation at the store; callers never
//! hold in-process locks across calls. Two implementations ship here:
//! [`MemoryStore`] for tests and single-process runs, and [`RedisStore`]
//! which runs the merge and rebuild steps as server-side Lua scripts.

mod error;
mod lua;
mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use trendcast_core::{
    AppConfig, Observation, StoreBackend, ThemeStats, TrendingEntry, WindowPolicy,
};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::{RedisKeys, RedisStore};

/// Result of looking up one theme's stats: `Ok(None)` when the entry is gone.
pub type StatsLookup = Result<Option<ThemeStats>, StoreError>;

/// Stream of ranked-set change notifications.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied { mention_count: i64 },
    /// The observation id was already merged within the dedup TTL.
    Duplicate,
}

/// What one rebuild of the ranked set did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub processed_themes: usize,
    pub ranked: usize,
    pub evicted: usize,
    /// Themes whose stats could not be decoded; left in place and unranked.
    pub malformed: Vec<String>,
}

/// A structural change to the ranked set (`zadd`, `del`, `rename_to`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub kind: String,
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Atomically fold `observation` into its theme's stats.
    ///
    /// When the observation carries an id that was merged less than
    /// `dedup_ttl` ago, nothing changes and [`MergeOutcome::Duplicate`] is
    /// returned.
    async fn merge(
        &self,
        observation: &Observation,
        dedup_ttl: Duration,
    ) -> Result<MergeOutcome, StoreError>;

    /// Evict expired themes and replace the ranked set with the active ones,
    /// as one atomic step.
    async fn rebuild_trending(
        &self,
        policy: WindowPolicy,
        now: i64,
    ) -> Result<RebuildReport, StoreError>;

    /// Ranked set, highest relevance first.
    async fn ranked(&self) -> Result<Vec<TrendingEntry>, StoreError>;

    /// Stats for each of `themes`, in the same order.
    async fn theme_stats(&self, themes: &[String]) -> Result<Vec<StatsLookup>, StoreError>;

    /// Subscribe to change notifications on the ranked set.
    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Open the store selected by `config.store`.
///
/// # Errors
///
/// Returns the connection error from [`RedisStore::connect`]; the memory
/// store cannot fail to open.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn StatsStore>, StoreError> {
    match config.store {
        StoreBackend::Redis => {
            let keys = RedisKeys::new(&config.stats_key, &config.trending_key);
            let store = RedisStore::connect(&config.redis_url, keys).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory stats store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Decode a stored stats value.
///
/// # Errors
///
/// Returns [`StoreError::MalformedStatsEntry`] when `raw` is not a valid
/// stats object or carries a negative mention count.
pub fn decode_stats(theme: &str, raw: &str) -> Result<ThemeStats, StoreError> {
    let stats: ThemeStats =
        serde_json::from_str(raw).map_err(|e| StoreError::MalformedStatsEntry {
            theme: theme.to_string(),
            reason: e.to_string(),
        })?;
    if stats.mention_count < 0 {
        return Err(StoreError::MalformedStatsEntry {
            theme: theme.to_string(),
            reason: format!("negative mention count {}", stats.mention_count),
        });
    }
    Ok(stats)
}

/// Encode stats the way [`decode_stats`] reads them.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if serialization fails.
pub fn encode_stats(stats: &ThemeStats) -> Result<String, StoreError> {
    serde_json::to_string(stats).map_err(|e| StoreError::Backend(e.to_string()))
}
