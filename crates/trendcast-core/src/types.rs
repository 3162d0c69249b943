use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Accumulated statistics for one theme.
///
/// Serialized as `{"totalSentiment":N,"mentionCount":N,"timestamp":N}`, the
/// encoding stored as the hash field value in the stats store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeStats {
    pub total_sentiment: i64,
    pub mention_count: i64,
    /// Unix seconds of the most recent merged observation.
    #[serde(rename = "timestamp")]
    pub last_updated: i64,
}

impl ThemeStats {
    /// Entry for a theme seen for the first time.
    #[must_use]
    pub fn first(score: i64, observed_at: i64) -> Self {
        Self {
            total_sentiment: score,
            mention_count: 1,
            last_updated: observed_at,
        }
    }

    /// Fold one observation into the running totals.
    ///
    /// `last_updated` never moves backwards, so a late observation cannot
    /// shorten a theme's window.
    pub fn absorb(&mut self, score: i64, observed_at: i64) {
        self.total_sentiment = self.total_sentiment.saturating_add(score);
        self.mention_count = self.mention_count.saturating_add(1);
        self.last_updated = self.last_updated.max(observed_at);
    }

    #[must_use]
    pub fn average_sentiment(&self) -> f64 {
        average_sentiment(self.total_sentiment, self.mention_count)
    }
}

/// Mean sentiment, or `0.0` when there are no mentions.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_sentiment(total_sentiment: i64, mention_count: i64) -> f64 {
    if mention_count <= 0 {
        return 0.0;
    }
    total_sentiment as f64 / mention_count as f64
}

/// One member of the ranked trending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingEntry {
    pub theme: String,
    /// Mention count recorded at the last aggregation pass.
    pub relevance: i64,
}

/// A ranked theme enriched with its sentiment average, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendRecord {
    pub theme: String,
    pub mentions: i64,
    pub average_sentiment: f64,
}

/// Ordered snapshot of trending themes, highest relevance first.
///
/// Serializes as a bare JSON array of [`TrendRecord`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedView {
    pub records: Vec<TrendRecord>,
}

impl RankedView {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn themes(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.theme.as_str()).collect()
    }
}

/// How far ahead of the receiving clock an event time may be, in seconds.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// A single `(theme, score)` pair ready to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub theme: String,
    pub score: i64,
    /// Unix seconds; event time when the upstream message carried one,
    /// otherwise the time the message was received.
    pub observed_at: i64,
    /// Deduplication key. Observations sharing an id are merged once.
    pub observation_id: Option<String>,
}

impl Observation {
    #[must_use]
    pub fn new(theme: impl Into<String>, score: i64, observed_at: i64) -> Self {
        Self {
            theme: theme.into(),
            score,
            observed_at,
            observation_id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.observation_id = Some(id.into());
        self
    }
}

/// One upstream classifier result: a map of theme to score, optionally with
/// a message id and event time.
///
/// Accepts either the envelope form
/// `{"id":"m-1","observedAt":1700000000,"themes":{"Housing":4}}` or the bare
/// map `{"Housing":4}` produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObservationMessage {
    Envelope {
        #[serde(default)]
        id: Option<String>,
        #[serde(default, rename = "observedAt")]
        observed_at: Option<i64>,
        themes: BTreeMap<String, i64>,
    },
    Bare(BTreeMap<String, i64>),
}

impl ObservationMessage {
    /// Parse one message from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload matches neither form.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            ObservationMessage::Envelope { themes, .. } | ObservationMessage::Bare(themes) => {
                themes.is_empty()
            }
        }
    }

    /// Expand into per-theme observations.
    ///
    /// Uses the message's own `observedAt` when present, else `received_at`.
    /// An `observedAt` more than [`MAX_CLOCK_SKEW_SECS`] past `received_at` is
    /// clamped to that bound. Theme names are trimmed. When the message has an
    /// id, each theme gets the id `"{id}:{theme}"` so a redelivered message is
    /// deduplicated theme by theme.
    #[must_use]
    pub fn into_observations(self, received_at: i64) -> Vec<Observation> {
        let latest = received_at.saturating_add(MAX_CLOCK_SKEW_SECS);
        let (id, observed_at, themes) = match self {
            ObservationMessage::Envelope {
                id,
                observed_at,
                themes,
            } => (
                id,
                observed_at.map_or(received_at, |t| t.min(latest)),
                themes,
            ),
            ObservationMessage::Bare(themes) => (None, received_at, themes),
        };

        themes
            .into_iter()
            .map(|(theme, score)| {
                let theme = theme.trim().to_string();
                Observation {
                    observation_id: id.as_ref().map(|id| format!("{id}:{theme}")),
                    theme,
                    score,
                    observed_at,
                }
            })
            .collect()
    }
}

/// Inclusive range of accepted sentiment scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBounds {
    pub min: i64,
    pub max: i64,
}

impl ScoreBounds {
    #[must_use]
    pub fn contains(&self, score: i64) -> bool {
        (self.min..=self.max).contains(&score)
    }
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self { min: 1, max: 5 }
    }
}
