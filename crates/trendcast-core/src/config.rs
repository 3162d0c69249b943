use crate::app_config::{AppConfig, Environment, StoreBackend};
use crate::types::ScoreBounds;
use crate::window::{WindowKind, WindowPolicy};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the window policy is
/// misconfigured.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the window policy is
/// misconfigured.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_i64 = |var: &str, default: &str| -> Result<i64, ConfigError> {
        or_default(var, default)
            .parse::<i64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let env = parse_environment(&or_default("TRENDCAST_ENV", "development"));

    let bind_addr = or_default("TRENDCAST_BIND_ADDR", "0.0.0.0:3000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("TRENDCAST_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("TRENDCAST_LOG_LEVEL", "info");

    let store = parse_store_backend(&or_default("TRENDCAST_STORE", "redis"))
        .map_err(|reason| invalid("TRENDCAST_STORE", reason))?;
    let redis_url = or_default("REDIS_URL", "redis://127.0.0.1:6379/");
    let stats_key = non_empty(
        "TRENDCAST_STATS_KEY",
        or_default("TRENDCAST_STATS_KEY", "sentiment-averages"),
    )?;
    let trending_key = non_empty(
        "TRENDCAST_TRENDING_KEY",
        or_default("TRENDCAST_TRENDING_KEY", "trending-topics"),
    )?;
    if stats_key == trending_key {
        return Err(invalid(
            "TRENDCAST_TRENDING_KEY",
            "must differ from TRENDCAST_STATS_KEY".to_string(),
        ));
    }

    let window_kind: WindowKind = or_default("TRENDCAST_WINDOW_POLICY", "session").parse()?;
    let window_secs = parse_u64("TRENDCAST_WINDOW_SECS", "120")?;
    let window = WindowPolicy::new(window_kind, window_secs)?;

    let aggregation_interval_secs = parse_u64("TRENDCAST_AGGREGATION_INTERVAL_SECS", "30")?;
    if aggregation_interval_secs == 0 {
        return Err(ConfigError::WindowPolicyMisconfigured(
            "aggregation interval must be greater than zero seconds".to_string(),
        ));
    }

    let dedup_ttl_secs = parse_u64("TRENDCAST_DEDUP_TTL_SECS", "3600")?;
    if dedup_ttl_secs == 0 {
        return Err(invalid(
            "TRENDCAST_DEDUP_TTL_SECS",
            "must be greater than zero".to_string(),
        ));
    }

    let score_bounds = ScoreBounds {
        min: parse_i64("TRENDCAST_SCORE_MIN", "1")?,
        max: parse_i64("TRENDCAST_SCORE_MAX", "5")?,
    };
    if score_bounds.min > score_bounds.max {
        return Err(invalid(
            "TRENDCAST_SCORE_MAX",
            format!(
                "score scale is inverted: min {} > max {}",
                score_bounds.min, score_bounds.max
            ),
        ));
    }

    let publish_poll_secs = parse_u64("TRENDCAST_PUBLISH_POLL_SECS", "0")?;
    let merge_max_retries = parse_u32("TRENDCAST_MERGE_MAX_RETRIES", "3")?;

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        store,
        redis_url,
        stats_key,
        trending_key,
        window,
        aggregation_interval_secs,
        dedup_ttl_secs,
        score_bounds,
        publish_poll_secs,
        merge_max_retries,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

fn parse_store_backend(s: &str) -> Result<StoreBackend, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "redis" => Ok(StoreBackend::Redis),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(format!(
            "unknown store backend '{other}'; expected 'redis' or 'memory'"
        )),
    }
}

fn non_empty(var: &str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use super::*;

    fn lookup_from_map<'a>(
        map: &'a HashMap<&'a str, &'a str>,
    ) -> impl Fn(&str) -> Result<String, VarError> + 'a {
        move |key| {
            map.get(key)
                .map(|v| (*v).to_string())
                .ok_or(VarError::NotPresent)
        }
    }

    #[test]
    fn parse_environment_production() {
        assert_eq!(parse_environment("production"), Environment::Production);
    }

    #[test]
    fn parse_environment_unknown_defaults_to_development() {
        assert_eq!(parse_environment("unknown"), Environment::Development);
    }

    #[test]
    fn build_app_config_uses_defaults() {
        let map = HashMap::new();
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.env, Environment::Development);
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.store, StoreBackend::Redis);
        assert_eq!(cfg.redis_url, "redis://127.0.0.1:6379/");
        assert_eq!(cfg.stats_key, "sentiment-averages");
        assert_eq!(cfg.trending_key, "trending-topics");
        assert_eq!(cfg.window.kind(), WindowKind::Session);
        assert_eq!(cfg.window.span_secs(), 120);
        assert_eq!(cfg.aggregation_interval_secs, 30);
        assert_eq!(cfg.dedup_ttl_secs, 3600);
        assert_eq!(cfg.score_bounds, ScoreBounds { min: 1, max: 5 });
        assert_eq!(cfg.publish_poll_secs, 0);
        assert_eq!(cfg.merge_max_retries, 3);
    }

    #[test]
    fn build_app_config_reads_tumbling_window() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_WINDOW_POLICY", "tumbling");
        map.insert("TRENDCAST_WINDOW_SECS", "60");
        map.insert("TRENDCAST_AGGREGATION_INTERVAL_SECS", "120");
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.window.kind(), WindowKind::Tumbling);
        assert_eq!(cfg.window.span_secs(), 60);
        assert_eq!(cfg.aggregation_interval_secs, 120);
    }

    #[test]
    fn build_app_config_rejects_unknown_window_policy() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_WINDOW_POLICY", "hopping");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::WindowPolicyMisconfigured(_))),
            "expected WindowPolicyMisconfigured, got: {result:?}"
        );
    }

    #[test]
    fn build_app_config_rejects_zero_window() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_WINDOW_SECS", "0");
        let result = build_app_config(lookup_from_map(&map));
        assert!(matches!(
            result,
            Err(ConfigError::WindowPolicyMisconfigured(_))
        ));
    }

    #[test]
    fn build_app_config_rejects_zero_cadence() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_AGGREGATION_INTERVAL_SECS", "0");
        let result = build_app_config(lookup_from_map(&map));
        assert!(matches!(
            result,
            Err(ConfigError::WindowPolicyMisconfigured(_))
        ));
    }

    #[test]
    fn build_app_config_rejects_non_numeric_window() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_WINDOW_SECS", "two minutes");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "TRENDCAST_WINDOW_SECS"),
            "expected InvalidEnvVar(TRENDCAST_WINDOW_SECS), got: {result:?}"
        );
    }

    #[test]
    fn build_app_config_rejects_inverted_score_scale() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_SCORE_MIN", "5");
        map.insert("TRENDCAST_SCORE_MAX", "1");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "TRENDCAST_SCORE_MAX"),
            "expected InvalidEnvVar(TRENDCAST_SCORE_MAX), got: {result:?}"
        );
    }

    #[test]
    fn build_app_config_reads_memory_store() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_STORE", "memory");
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(cfg.store, StoreBackend::Memory);
    }

    #[test]
    fn build_app_config_rejects_unknown_store() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_STORE", "memcached");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "TRENDCAST_STORE"),
            "expected InvalidEnvVar(TRENDCAST_STORE), got: {result:?}"
        );
    }

    #[test]
    fn build_app_config_rejects_shared_keys() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_STATS_KEY", "trends");
        map.insert("TRENDCAST_TRENDING_KEY", "trends");
        assert!(build_app_config(lookup_from_map(&map)).is_err());
    }

    #[test]
    fn build_app_config_rejects_invalid_bind_addr() {
        let mut map = HashMap::new();
        map.insert("TRENDCAST_BIND_ADDR", "not-a-socket-addr");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "TRENDCAST_BIND_ADDR"),
            "expected InvalidEnvVar(TRENDCAST_BIND_ADDR), got: {result:?}"
        );
    }

    #[test]
    fn debug_output_redacts_redis_url() {
        let mut map = HashMap::new();
        map.insert("REDIS_URL", "redis://:hunter2@cache:6379/");
        let cfg = build_app_config(lookup_from_map(&map)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[redacted]"));
    }
}
