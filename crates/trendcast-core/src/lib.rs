//! Shared domain types and configuration for trendcast.
//!
//! Everything here is store-agnostic: the theme statistics model, the ranked
//! view pushed to subscribers, the window policies, and the env-driven
//! [`AppConfig`].

mod app_config;
mod config;
pub mod types;
pub mod window;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, StoreBackend};
pub use config::{load_app_config, load_app_config_from_env};
pub use types::{
    average_sentiment, Observation, ObservationMessage, RankedView, ScoreBounds, ThemeStats,
    TrendRecord, TrendingEntry, MAX_CLOCK_SKEW_SECS,
};
pub use window::{WindowKind, WindowPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("window policy misconfigured: {0}")]
    WindowPolicyMisconfigured(String),
}
