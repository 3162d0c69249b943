//! Pushes the ranked view to live subscribers.
//!
//! The publisher listens for ranked-set change notifications and marks the
//! view dirty on each one. A single recompute loop drains the dirty flag:
//! notifications that arrive while a recompute is in flight collapse into
//! at most one follow-up recompute. Views go out over a bounded broadcast
//! channel, so a slow subscriber lags and skips stale views instead of
//! holding anyone else up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex, Notify};
use trendcast_core::{AppConfig, RankedView, TrendRecord};
use trendcast_store::StatsStore;

use crate::error::EngineError;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy)]
pub struct PublisherSettings {
    /// Recompute on this cadence in addition to change notifications.
    pub poll_interval: Option<Duration>,
    pub channel_capacity: usize,
    /// Wait before re-subscribing after the notification stream drops.
    pub resubscribe_backoff: Duration,
}

impl PublisherSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: (config.publish_poll_secs > 0)
                .then(|| Duration::from_secs(config.publish_poll_secs)),
            ..Self::default()
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            poll_interval: None,
            channel_capacity: 16,
            resubscribe_backoff: Duration::from_secs(5),
        }
    }
}

pub struct TrendPublisher {
    store: Arc<dyn StatsStore>,
    updates: broadcast::Sender<Arc<RankedView>>,
    dirty: Notify,
    last_sent: Mutex<Option<Arc<RankedView>>>,
    recomputes: AtomicU64,
    settings: PublisherSettings,
}

impl TrendPublisher {
    #[must_use]
    pub fn new(store: Arc<dyn StatsStore>, settings: PublisherSettings) -> Self {
        let (updates, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            store,
            updates,
            dirty: Notify::new(),
            last_sent: Mutex::new(None),
            recomputes: AtomicU64::new(0),
            settings,
        }
    }

    /// Join the ranked set with per-theme stats.
    ///
    /// Ranked themes whose stats are missing or malformed (typically evicted
    /// between the two reads) are dropped from the view.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when either read fails outright.
    pub async fn current_view(&self) -> Result<RankedView, EngineError> {
        let ranked = self.store.ranked().await?;
        if ranked.is_empty() {
            return Ok(RankedView::default());
        }

        let themes: Vec<String> = ranked.iter().map(|e| e.theme.clone()).collect();
        let lookups = self.store.theme_stats(&themes).await?;

        let mut records = Vec::with_capacity(ranked.len());
        for (entry, lookup) in ranked.into_iter().zip(lookups) {
            match lookup {
                Ok(Some(stats)) => records.push(TrendRecord {
                    average_sentiment: stats.average_sentiment(),
                    mentions: entry.relevance,
                    theme: entry.theme,
                }),
                Ok(None) => {
                    tracing::debug!(theme = %entry.theme, "publisher: ranked theme has no stats; dropped");
                }
                Err(e) => {
                    tracing::debug!(theme = %entry.theme, error = %e, "publisher: unreadable stats; dropped");
                }
            }
        }
        Ok(RankedView { records })
    }

    /// Register a new subscriber.
    ///
    /// Returns the current view to send immediately, plus a receiver for
    /// every later broadcast. The receiver is created first so no broadcast
    /// can slip between the snapshot and the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the initial view cannot be built.
    pub async fn on_subscriber_connect(
        &self,
    ) -> Result<(RankedView, broadcast::Receiver<Arc<RankedView>>), EngineError> {
        let receiver = self.subscribe();
        let view = self.current_view().await?;
        Ok((view, receiver))
    }

    /// Receiver for future broadcasts only, with no initial snapshot.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RankedView>> {
        self.updates.subscribe()
    }

    /// Subscribe a client whose initial view could not be built.
    ///
    /// Forgets the last sent view and requests a recompute, so the next
    /// successful recompute is broadcast even if the view has not changed
    /// since before the client connected.
    pub async fn subscribe_without_snapshot(&self) -> broadcast::Receiver<Arc<RankedView>> {
        let receiver = self.subscribe();
        *self.last_sent.lock().await = None;
        self.mark_dirty();
        receiver
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }

    /// Number of recomputations performed so far.
    #[must_use]
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }

    /// Request a recompute. Repeated calls before the loop wakes collapse
    /// into one.
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Rebuild the view and broadcast it if it differs from the last one
    /// sent. Returns how many subscribers it reached.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the view cannot be built; nothing
    /// is sent to subscribers in that case.
    pub async fn recompute_and_broadcast(&self) -> Result<usize, EngineError> {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        let view = Arc::new(self.current_view().await?);

        let mut last_sent = self.last_sent.lock().await;
        if last_sent.as_deref() == Some(view.as_ref()) {
            tracing::debug!("publisher: view unchanged; nothing to broadcast");
            return Ok(0);
        }
        *last_sent = Some(Arc::clone(&view));
        drop(last_sent);

        let count = view.len();
        let reached = self.updates.send(view).unwrap_or(0);
        tracing::debug!(themes = count, subscribers = reached, "publisher: broadcast view");
        Ok(reached)
    }

    /// Drive the publisher until `shutdown` fires.
    ///
    /// Spawns the notification listener (and the poller when configured),
    /// then runs the recompute loop on the current task.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let listener = tokio::spawn(Arc::clone(&self).listen_for_changes(shutdown.clone()));
        let poller = self
            .settings
            .poll_interval
            .map(|every| tokio::spawn(Arc::clone(&self).poll(every, shutdown.clone())));

        // Subscribers connecting before the first notification still get a
        // snapshot on connect; this primes `last_sent`.
        self.mark_dirty();

        let mut stop = shutdown;
        loop {
            tokio::select! {
                () = self.dirty.notified() => {
                    if let Err(e) = self.recompute_and_broadcast().await {
                        tracing::warn!(error = %e, "publisher: recompute failed; subscribers keep last view");
                    }
                }
                () = stop.wait() => break,
            }
        }

        listener.abort();
        if let Some(poller) = poller {
            poller.abort();
        }
        tracing::info!("publisher: stopped");
    }

    async fn listen_for_changes(self: Arc<Self>, mut shutdown: Shutdown) {
        while !shutdown.is_triggered() {
            match self.store.subscribe_changes().await {
                Ok(mut changes) => {
                    tracing::info!("publisher: subscribed to ranked-set changes");
                    // A gap in the subscription may have hidden changes.
                    self.mark_dirty();
                    loop {
                        tokio::select! {
                            event = changes.next() => match event {
                                Some(Ok(event)) => {
                                    tracing::trace!(kind = %event.kind, key = %event.key, "publisher: change notification");
                                    self.mark_dirty();
                                }
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "publisher: unreadable change notification");
                                }
                                None => {
                                    tracing::warn!("publisher: change notification stream ended");
                                    break;
                                }
                            },
                            () = shutdown.wait() => return,
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "publisher: could not subscribe to changes");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.resubscribe_backoff) => {}
                () = shutdown.wait() => return,
            }
        }
    }

    async fn poll(self: Arc<Self>, every: Duration, mut shutdown: Shutdown) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.mark_dirty(),
                () = shutdown.wait() => return,
            }
        }
    }
}
