use std::net::SocketAddr;

use crate::types::ScoreBounds;
use crate::window::WindowPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Which stats store implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Process-local store; state is lost on restart.
    Memory,
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub store: StoreBackend,
    pub redis_url: String,
    pub stats_key: String,
    pub trending_key: String,
    pub window: WindowPolicy,
    pub aggregation_interval_secs: u64,
    pub dedup_ttl_secs: u64,
    pub score_bounds: ScoreBounds,
    pub publish_poll_secs: u64,
    pub merge_max_retries: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("store", &self.store)
            .field("redis_url", &"[redacted]")
            .field("stats_key", &self.stats_key)
            .field("trending_key", &self.trending_key)
            .field("window", &self.window)
            .field(
                "aggregation_interval_secs",
                &self.aggregation_interval_secs,
            )
            .field("dedup_ttl_secs", &self.dedup_ttl_secs)
            .field("score_bounds", &self.score_bounds)
            .field("publish_poll_secs", &self.publish_poll_secs)
            .field("merge_max_retries", &self.merge_max_retries)
            .finish()
    }
}
