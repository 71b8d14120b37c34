//! Configuration for the subscriber.

use crate::error::{SubscriberError, SubscriberResult};
use alert_core::DEFAULT_RETRY_DELAY;
use alert_queue::RedisStreamsOptions;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE_NAME: &str = "alertas";
pub const DEFAULT_DB_PATH: &str = "./data/alerts.db";

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Broker connection URL
    pub redis_url: String,

    /// Durable queue to consume
    pub queue_name: String,

    /// SQLite file holding processed alerts
    pub db_path: PathBuf,

    /// Fixed delay before reconnecting after a failure
    pub reconnect_delay: Duration,

    /// Bound on connect + channel + declare
    pub connect_timeout: Duration,

    /// Consumer group name
    pub consumer_group: String,

    /// Consumer name, stable across restarts
    pub consumer_name: String,

    /// XREADGROUP block timeout in milliseconds
    pub block_timeout_ms: u64,

    /// Idle time after which another consumer's pending entry is claimed
    pub claim_min_idle_ms: u64,

    /// Report store statistics after this many received alerts
    pub stats_every: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        let redis = RedisStreamsOptions::default();
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            reconnect_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: Duration::from_secs(10),
            consumer_group: redis.consumer_group,
            consumer_name: redis.consumer_name,
            block_timeout_ms: redis.block_timeout_ms,
            claim_min_idle_ms: redis.claim_min_idle_ms,
            stats_every: 5,
        }
    }
}

impl SubscriberConfig {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|s| s.parse::<u64>().ok());

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_name: lookup("QUEUE_NAME").unwrap_or(defaults.queue_name),
            db_path: lookup("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            reconnect_delay: number("RECONNECT_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            connect_timeout: number("CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_name: lookup("CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            block_timeout_ms: number("BLOCK_TIMEOUT_MS").unwrap_or(defaults.block_timeout_ms),
            claim_min_idle_ms: number("CLAIM_MIN_IDLE_MS").unwrap_or(defaults.claim_min_idle_ms),
            stats_every: number("STATS_EVERY").unwrap_or(defaults.stats_every),
        }
    }

    /// Consumer-group settings for the Redis transport.
    pub fn redis_options(&self) -> RedisStreamsOptions {
        RedisStreamsOptions {
            consumer_group: self.consumer_group.clone(),
            consumer_name: self.consumer_name.clone(),
            block_timeout_ms: self.block_timeout_ms,
            claim_min_idle_ms: self.claim_min_idle_ms,
        }
    }

    /// Reject settings the subscriber cannot run with.
    pub fn validate(&self) -> SubscriberResult<()> {
        if self.queue_name.is_empty() {
            return Err(SubscriberError::Config("queue name is empty".to_string()));
        }
        if self.stats_every == 0 {
            return Err(SubscriberError::Config(
                "stats interval must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(SubscriberError::Config(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SubscriberConfig::from_lookup(|_| None);

        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.queue_name, "alertas");
        assert_eq!(config.db_path, PathBuf::from("./data/alerts.db"));
        assert_eq!(config.reconnect_delay, Duration::from_millis(5000));
        assert_eq!(config.consumer_group, "alert-subscribers");
        assert_eq!(config.consumer_name, "subscriber-1");
        assert_eq!(config.block_timeout_ms, 5000);
        assert_eq!(config.claim_min_idle_ms, 60_000);
        assert_eq!(config.stats_every, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DB_PATH", "/var/lib/alerts/alerts.db"),
            ("CONSUMER_NAME", "subscriber-b"),
            ("STATS_EVERY", "10"),
            ("RECONNECT_DELAY_MS", "250"),
            ("CLAIM_MIN_IDLE_MS", "1500"),
        ]);
        let config = SubscriberConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.db_path, PathBuf::from("/var/lib/alerts/alerts.db"));
        assert_eq!(config.stats_every, 10);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));

        let redis = config.redis_options();
        assert_eq!(redis.consumer_name, "subscriber-b");
        assert_eq!(redis.consumer_group, "alert-subscribers");
        assert_eq!(redis.claim_min_idle_ms, 1500);
    }

    #[test]
    fn test_zero_stats_interval_is_rejected() {
        let config = SubscriberConfig {
            stats_every: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SubscriberError::Config(_))
        ));
    }
}
