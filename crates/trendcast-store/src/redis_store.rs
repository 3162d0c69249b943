//! Redis-backed [`StatsStore`].
//!
//! Merge and rebuild run as Lua scripts so each is atomic at the server.
//! Change notifications come from key-space events on the ranked set, which
//! requires `notify-keyspace-events` to include `K`, `g` and `z`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use trendcast_core::{Observation, TrendingEntry, WindowPolicy};

use crate::{
    decode_stats, lua, ChangeEvent, ChangeStream, MergeOutcome, RebuildReport, StatsLookup,
    StatsStore, StoreError,
};

const KEYSPACE_EVENTS: &str = "Kgz";

/// Flags string that keeps everything in `current` and adds whatever of
/// `K`, `g` and `z` is missing, or `None` when nothing is missing.
/// `A` already covers `g` and `z`.
fn with_required_keyspace_flags(current: &str) -> Option<String> {
    let covers_all = current.contains('A');
    let missing: String = KEYSPACE_EVENTS
        .chars()
        .filter(|flag| !current.contains(*flag) && !(covers_all && *flag != 'K'))
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(format!("{current}{missing}"))
    }
}

/// Key names used by [`RedisStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    /// Hash of theme → encoded stats.
    pub stats: String,
    /// Sorted set of theme → relevance.
    pub trending: String,
    /// Scratch sorted set filled during a rebuild before the swap.
    pub staging: String,
    /// Prefix for per-observation dedup markers.
    pub dedup_prefix: String,
}

impl RedisKeys {
    #[must_use]
    pub fn new(stats_key: &str, trending_key: &str) -> Self {
        Self {
            stats: stats_key.to_string(),
            trending: trending_key.to_string(),
            staging: format!("{trending_key}:staging"),
            dedup_prefix: format!("{stats_key}:seen:"),
        }
    }

    fn dedup_marker(&self, observation_id: &str) -> String {
        format!("{}{observation_id}", self.dedup_prefix)
    }

    fn keyspace_pattern(&self) -> String {
        format!("__keyspace@*__:{}", self.trending)
    }
}

pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    keys: RedisKeys,
    merge_script: Script,
    rebuild_script: Script,
}

impl RedisStore {
    /// Connect, make sure key-space notifications are on, and load scripts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the server cannot be reached, or
    /// [`StoreError::TransactionUnsupported`] if it refuses `SCRIPT LOAD`.
    pub async fn connect(url: &str, keys: RedisKeys) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = client.get_multiplexed_async_connection().await?;

        let store = Self {
            client,
            conn,
            keys,
            merge_script: Script::new(lua::MERGE),
            rebuild_script: Script::new(lua::REBUILD),
        };
        store.enable_keyspace_events().await;
        store.load_scripts().await?;
        tracing::info!(
            stats_key = %store.keys.stats,
            trending_key = %store.keys.trending,
            "connected to redis stats store"
        );
        Ok(store)
    }

    #[must_use]
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    /// Load both scripts into the server's script cache.
    ///
    /// # Errors
    ///
    /// Propagates the load failure mapped to a [`StoreError`].
    pub async fn load_scripts(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        for (name, source) in [("merge", lua::MERGE), ("rebuild", lua::REBUILD)] {
            let sha: String = redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(source)
                .query_async(&mut conn)
                .await?;
            tracing::debug!(script = name, %sha, "lua script loaded");
        }
        Ok(())
    }

    /// Make sure key-space notifications include the flags the ranked set
    /// needs, keeping whatever the operator already configured.
    ///
    /// Managed Redis offerings often reject `CONFIG`; that is logged and
    /// left to the operator.
    async fn enable_keyspace_events(&self) {
        let mut conn = self.conn.clone();
        let current: Result<Vec<String>, redis::RedisError> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(&mut conn)
            .await;

        let configured = match current {
            Ok(pair) => pair.get(1).cloned().unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "could not read notify-keyspace-events; change notifications may be silent"
                );
                return;
            }
        };

        let Some(flags) = with_required_keyspace_flags(&configured) else {
            tracing::debug!(flags = %configured, "keyspace notifications already configured");
            return;
        };

        let set: Result<(), redis::RedisError> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(&flags)
            .query_async(&mut conn)
            .await;
        match set {
            Ok(()) => {
                tracing::info!(from = %configured, to = %flags, "enabled keyspace notifications");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    flags = %configured,
                    "could not enable keyspace notifications; change notifications may be silent"
                );
            }
        }
    }

    /// Map a script failure, reloading the script cache when it was flushed.
    async fn script_error(&self, err: redis::RedisError) -> StoreError {
        let mapped = StoreError::from(err);
        if matches!(mapped, StoreError::ScriptNotLoaded) {
            tracing::warn!("redis script cache was flushed; reloading scripts");
            if let Err(e) = self.load_scripts().await {
                tracing::error!(error = %e, "failed to reload lua scripts");
            }
        }
        mapped
    }
}

#[async_trait]
impl StatsStore for RedisStore {
    async fn merge(
        &self,
        observation: &Observation,
        dedup_ttl: Duration,
    ) -> Result<MergeOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.merge_script.prepare_invoke();
        invocation.key(&self.keys.stats);
        if let Some(id) = &observation.observation_id {
            invocation.key(self.keys.dedup_marker(id));
        }
        invocation
            .arg(&observation.theme)
            .arg(observation.score)
            .arg(observation.observed_at)
            .arg(dedup_ttl.as_secs().max(1));

        let result: Result<i64, redis::RedisError> = invocation.invoke_async(&mut conn).await;
        match result {
            Ok(-1) => Ok(MergeOutcome::Duplicate),
            Ok(mention_count) => Ok(MergeOutcome::Applied { mention_count }),
            Err(e) => Err(self.script_error(e).await),
        }
    }

    async fn rebuild_trending(
        &self,
        policy: WindowPolicy,
        now: i64,
    ) -> Result<RebuildReport, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.rebuild_script.prepare_invoke();
        invocation
            .key(&self.keys.stats)
            .key(&self.keys.trending)
            .key(&self.keys.staging)
            .arg(now)
            .arg(policy.kind().as_str())
            .arg(policy.span_secs());

        let result: Result<(usize, usize, usize, Vec<String>), redis::RedisError> =
            invocation.invoke_async(&mut conn).await;
        match result {
            Ok((processed_themes, ranked, evicted, mut malformed)) => {
                malformed.sort();
                Ok(RebuildReport {
                    processed_themes,
                    ranked,
                    evicted,
                    malformed,
                })
            }
            Err(e) => Err(self.script_error(e).await),
        }
    }

    async fn ranked(&self) -> Result<Vec<TrendingEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn
            .zrevrange_withscores(&self.keys.trending, 0, -1)
            .await?;
        #[allow(clippy::cast_possible_truncation)]
        let entries = members
            .into_iter()
            .map(|(theme, score)| TrendingEntry {
                theme,
                relevance: score.round() as i64,
            })
            .collect();
        Ok(entries)
    }

    async fn theme_stats(&self, themes: &[String]) -> Result<Vec<StatsLookup>, StoreError> {
        if themes.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&self.keys.stats)
            .arg(themes)
            .query_async(&mut conn)
            .await?;

        Ok(themes
            .iter()
            .zip(raw)
            .map(|(theme, raw)| raw.map(|raw| decode_stats(theme, &raw)).transpose())
            .collect())
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(self.keys.keyspace_pattern()).await?;

        let key = self.keys.trending.clone();
        let stream = pubsub
            .into_on_message()
            .map(move |msg| -> Result<ChangeEvent, StoreError> {
                let kind: String = msg.get_payload()?;
                Ok(ChangeEvent {
                    key: key.clone(),
                    kind,
                })
            });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_derive_staging_and_dedup_names() {
        let keys = RedisKeys::new("sentiment-averages", "trending-topics");
        assert_eq!(keys.staging, "trending-topics:staging");
        assert_eq!(
            keys.dedup_marker("m-1:Roads"),
            "sentiment-averages:seen:m-1:Roads"
        );
        assert_eq!(keys.keyspace_pattern(), "__keyspace@*__:trending-topics");
    }

    #[test]
    fn keyspace_flags_are_added_to_existing_config() {
        assert_eq!(with_required_keyspace_flags(""), Some("Kgz".to_string()));
        assert_eq!(with_required_keyspace_flags("Ex"), Some("ExKgz".to_string()));
        assert_eq!(with_required_keyspace_flags("Kg"), Some("Kgz".to_string()));
        assert_eq!(with_required_keyspace_flags("KA"), None);
        assert_eq!(with_required_keyspace_flags("zKgE"), None);
    }
}
