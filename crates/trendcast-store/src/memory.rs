//! Process-local [`StatsStore`].
//!
//! All state sits behind one mutex, so each trait call is atomic with respect
//! to every other call. Stats are kept in their encoded string form, which
//! lets tests plant malformed entries the same way a foreign writer could in
//! Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use trendcast_core::{Observation, ThemeStats, TrendingEntry, WindowPolicy};

use crate::{
    decode_stats, encode_stats, ChangeEvent, ChangeStream, MergeOutcome, RebuildReport,
    StatsLookup, StatsStore, StoreError,
};

const TRENDING_KEY: &str = "trending-topics";
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct MemoryState {
    stats: HashMap<String, String>,
    trending: Vec<TrendingEntry>,
    seen_ids: HashMap<String, Instant>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<ChangeEvent>,
    offline: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            changes,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while offline every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store a raw stats value for `theme`, bypassing the merge path.
    pub async fn insert_raw_stats(&self, theme: &str, raw: &str) {
        self.state
            .lock()
            .await
            .stats
            .insert(theme.to_string(), raw.to_string());
    }

    /// Delete a theme's stats without touching the ranked set.
    pub async fn remove_stats(&self, theme: &str) -> bool {
        self.state.lock().await.stats.remove(theme).is_some()
    }

    /// Number of themes with stats entries.
    pub async fn stats_len(&self) -> usize {
        self.state.lock().await.stats.len()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn notify(&self, kind: &str) {
        // No receivers is fine; the publisher may not be running.
        let _ = self.changes.send(ChangeEvent {
            key: TRENDING_KEY.to_string(),
            kind: kind.to_string(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn merge(
        &self,
        observation: &Observation,
        dedup_ttl: Duration,
    ) -> Result<MergeOutcome, StoreError> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        if let Some(id) = &observation.observation_id {
            let now = Instant::now();
            state.seen_ids.retain(|_, expires_at| *expires_at > now);
            if state.seen_ids.contains_key(id) {
                return Ok(MergeOutcome::Duplicate);
            }
            state.seen_ids.insert(id.clone(), now + dedup_ttl);
        }

        let stats = match state.stats.get(&observation.theme) {
            Some(raw) => match decode_stats(&observation.theme, raw) {
                Ok(mut stats) => {
                    stats.absorb(observation.score, observation.observed_at);
                    stats
                }
                Err(e) => {
                    tracing::warn!(error = %e, "replacing malformed stats entry");
                    ThemeStats::first(observation.score, observation.observed_at)
                }
            },
            None => ThemeStats::first(observation.score, observation.observed_at),
        };

        state
            .stats
            .insert(observation.theme.clone(), encode_stats(&stats)?);
        Ok(MergeOutcome::Applied {
            mention_count: stats.mention_count,
        })
    }

    async fn rebuild_trending(
        &self,
        policy: WindowPolicy,
        now: i64,
    ) -> Result<RebuildReport, StoreError> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        let mut report = RebuildReport {
            processed_themes: state.stats.len(),
            ..RebuildReport::default()
        };
        let mut staged = Vec::new();
        let mut expired = Vec::new();

        for (theme, raw) in &state.stats {
            let stats = match decode_stats(theme, raw) {
                Ok(stats) => stats,
                Err(_) => {
                    report.malformed.push(theme.clone());
                    continue;
                }
            };
            if !policy.is_active(stats.last_updated, now) {
                expired.push(theme.clone());
            } else if stats.mention_count > 0 {
                staged.push(TrendingEntry {
                    theme: theme.clone(),
                    relevance: stats.mention_count,
                });
            }
        }

        for theme in &expired {
            state.stats.remove(theme);
        }
        report.evicted = expired.len();
        report.ranked = staged.len();
        report.malformed.sort();

        staged.sort_by(|a, b| {
            b.relevance
                .cmp(&a.relevance)
                .then_with(|| a.theme.cmp(&b.theme))
        });
        let had_members = !state.trending.is_empty();
        state.trending = staged;
        let has_members = !state.trending.is_empty();
        drop(state);

        if has_members {
            self.notify("rename_to");
        } else if had_members {
            self.notify("del");
        }

        Ok(report)
    }

    async fn ranked(&self) -> Result<Vec<TrendingEntry>, StoreError> {
        self.ensure_online()?;
        Ok(self.state.lock().await.trending.clone())
    }

    async fn theme_stats(&self, themes: &[String]) -> Result<Vec<StatsLookup>, StoreError> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        Ok(themes
            .iter()
            .map(|theme| {
                state
                    .stats
                    .get(theme)
                    .map(|raw| decode_stats(theme, raw))
                    .transpose()
            })
            .collect())
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream, StoreError> {
        self.ensure_online()?;
        let rx = self.changes.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                // Missed events still mean the set changed.
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let event = ChangeEvent {
                        key: TRENDING_KEY.to_string(),
                        kind: "lagged".to_string(),
                    };
                    Some((Ok(event), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    async fn stats_of(store: &MemoryStore, theme: &str) -> ThemeStats {
        let lookups = store.theme_stats(&[theme.to_string()]).await.unwrap();
        lookups
            .into_iter()
            .next()
            .unwrap()
            .unwrap()
            .expect("stats entry present")
    }

    #[tokio::test]
    async fn merge_creates_then_accumulates() {
        let store = MemoryStore::new();
        let first = store
            .merge(&Observation::new("Housing", 4, 0), TTL)
            .await
            .unwrap();
        assert_eq!(first, MergeOutcome::Applied { mention_count: 1 });
        store
            .merge(&Observation::new("Housing", 2, 5), TTL)
            .await
            .unwrap();

        let stats = stats_of(&store, "Housing").await;
        assert_eq!(stats.total_sentiment, 6);
        assert_eq!(stats.mention_count, 2);
        assert_eq!(stats.last_updated, 5);
    }

    #[tokio::test]
    async fn merge_skips_repeated_observation_id() {
        let store = MemoryStore::new();
        let obs = Observation::new("Roads", 5, 0).with_id("m-1:Roads");
        store.merge(&obs, TTL).await.unwrap();
        let replay = store.merge(&obs, TTL).await.unwrap();
        assert_eq!(replay, MergeOutcome::Duplicate);

        assert_eq!(stats_of(&store, "Roads").await.mention_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observation_id_is_forgotten_after_ttl() {
        let store = MemoryStore::new();
        let obs = Observation::new("Roads", 5, 0).with_id("m-1:Roads");
        store.merge(&obs, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        let again = store.merge(&obs, Duration::from_secs(10)).await.unwrap();
        assert_eq!(again, MergeOutcome::Applied { mention_count: 2 });
    }

    #[tokio::test]
    async fn merge_replaces_malformed_entry() {
        let store = MemoryStore::new();
        store.insert_raw_stats("Parks", "{broken").await;
        let outcome = store
            .merge(&Observation::new("Parks", 3, 7), TTL)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Applied { mention_count: 1 });
    }

    #[tokio::test]
    async fn theme_stats_reports_missing_and_malformed() {
        let store = MemoryStore::new();
        store.insert_raw_stats("Parks", "{broken").await;
        let lookups = store
            .theme_stats(&["Parks".to_string(), "Ghost".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            lookups[0],
            Err(StoreError::MalformedStatsEntry { .. })
        ));
        assert!(matches!(lookups[1], Ok(None)));
    }

    #[tokio::test]
    async fn rebuild_ranks_by_mentions_and_evicts_expired() {
        let store = MemoryStore::new();
        for (theme, score, at) in [("Housing", 4, 100), ("Housing", 2, 100), ("Roads", 5, 100)] {
            store
                .merge(&Observation::new(theme, score, at), TTL)
                .await
                .unwrap();
        }
        store
            .merge(&Observation::new("Parks", 3, 0), TTL)
            .await
            .unwrap();
        store.insert_raw_stats("Broken", "[]").await;

        let policy = WindowPolicy::tumbling(60).unwrap();
        let report = store.rebuild_trending(policy, 110).await.unwrap();
        assert_eq!(report.processed_themes, 4);
        assert_eq!(report.ranked, 2);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.malformed, vec!["Broken".to_string()]);

        let ranked = store.ranked().await.unwrap();
        assert_eq!(
            ranked,
            vec![
                TrendingEntry {
                    theme: "Housing".to_string(),
                    relevance: 2
                },
                TrendingEntry {
                    theme: "Roads".to_string(),
                    relevance: 1
                },
            ]
        );
        assert!(!store.remove_stats("Parks").await, "Parks was evicted");
    }

    #[tokio::test]
    async fn rebuild_notifies_subscribers() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe_changes().await.unwrap();
        store
            .merge(&Observation::new("Roads", 5, 0), TTL)
            .await
            .unwrap();
        let policy = WindowPolicy::session(120).unwrap();

        store.rebuild_trending(policy, 10).await.unwrap();
        let event = changes.next().await.unwrap().unwrap();
        assert_eq!(event.kind, "rename_to");

        store.rebuild_trending(policy, 500).await.unwrap();
        let event = changes.next().await.unwrap().unwrap();
        assert_eq!(event.kind, "del");
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
