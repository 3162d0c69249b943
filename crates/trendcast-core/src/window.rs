//! Window policies deciding which themes stay in the trending set.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Fixed-size window anchored on the theme's last update.
    Tumbling,
    /// Inactivity window; every observation extends the session.
    Session,
}

impl WindowKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Tumbling => "tumbling",
            WindowKind::Session => "session",
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tumbling" => Ok(WindowKind::Tumbling),
            "session" => Ok(WindowKind::Session),
            other => Err(ConfigError::WindowPolicyMisconfigured(format!(
                "unknown window policy '{other}'; expected 'tumbling' or 'session'"
            ))),
        }
    }
}

/// A window kind together with its span in seconds.
///
/// For [`WindowKind::Tumbling`] the span is the window size; for
/// [`WindowKind::Session`] it is the inactivity timeout. Both bounds are
/// inclusive: a theme updated exactly `span_secs` ago is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    kind: WindowKind,
    span_secs: i64,
}

impl WindowPolicy {
    /// Build a policy, rejecting non-positive spans.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WindowPolicyMisconfigured`] when `span_secs` is
    /// zero or does not fit a signed 64-bit timestamp delta.
    pub fn new(kind: WindowKind, span_secs: u64) -> Result<Self, ConfigError> {
        let span = i64::try_from(span_secs).map_err(|_| {
            ConfigError::WindowPolicyMisconfigured(format!("{kind} span {span_secs}s is too large"))
        })?;
        if span == 0 {
            return Err(ConfigError::WindowPolicyMisconfigured(format!(
                "{kind} span must be greater than zero seconds"
            )));
        }
        Ok(Self {
            kind,
            span_secs: span,
        })
    }

    /// # Errors
    ///
    /// See [`WindowPolicy::new`].
    pub fn tumbling(window_size_secs: u64) -> Result<Self, ConfigError> {
        Self::new(WindowKind::Tumbling, window_size_secs)
    }

    /// # Errors
    ///
    /// See [`WindowPolicy::new`].
    pub fn session(timeout_secs: u64) -> Result<Self, ConfigError> {
        Self::new(WindowKind::Session, timeout_secs)
    }

    #[must_use]
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    #[must_use]
    pub fn span_secs(&self) -> i64 {
        self.span_secs
    }

    /// Whether a theme last updated at `last_updated` is still inside the
    /// window when evaluated at `now`.
    #[must_use]
    pub fn is_active(&self, last_updated: i64, now: i64) -> bool {
        match self.kind {
            WindowKind::Tumbling => last_updated.saturating_add(self.span_secs) >= now,
            WindowKind::Session => now.saturating_sub(last_updated) <= self.span_secs,
        }
    }
}

impl std::fmt::Display for WindowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}s)", self.kind, self.span_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tumbling_keeps_theme_through_window_edge() {
        let policy = WindowPolicy::tumbling(60).unwrap();
        assert!(policy.is_active(0, 0));
        assert!(policy.is_active(0, 60));
        assert!(!policy.is_active(0, 61));
    }

    #[test]
    fn session_extends_with_each_update() {
        let policy = WindowPolicy::session(120).unwrap();
        let mut last_updated = 0;
        for now in (30..=600).step_by(30) {
            assert!(policy.is_active(last_updated, now), "evicted at {now}");
            last_updated = now;
        }
        assert!(!policy.is_active(last_updated, last_updated + 121));
    }

    #[test]
    fn zero_span_is_misconfigured() {
        let err = WindowPolicy::session(0).unwrap_err();
        assert!(matches!(err, ConfigError::WindowPolicyMisconfigured(_)));
    }

    #[test]
    fn oversized_span_is_misconfigured() {
        assert!(WindowPolicy::tumbling(u64::MAX).is_err());
    }

    #[test]
    fn window_kind_parses_case_insensitively() {
        assert_eq!("Tumbling".parse::<WindowKind>().unwrap(), WindowKind::Tumbling);
        assert_eq!(" session ".parse::<WindowKind>().unwrap(), WindowKind::Session);
        assert!("sliding".parse::<WindowKind>().is_err());
    }

    #[test]
    fn future_timestamps_stay_active() {
        let policy = WindowPolicy::session(10).unwrap();
        assert!(policy.is_active(100, 50));
    }
}
