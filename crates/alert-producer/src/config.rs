//! Configuration for the producer.

use crate::error::{ProducerError, ProducerResult};
use alert_core::DEFAULT_RETRY_DELAY;
use alert_queue::RedisStreamsOptions;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE_NAME: &str = "alertas";

/// Producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Broker connection URL
    pub redis_url: String,

    /// Durable queue alerts are published to
    pub queue_name: String,

    /// Consumer group created when the queue is declared
    pub consumer_group: String,

    /// Time between two published alerts
    pub publish_interval: Duration,

    /// Fixed delay before reconnecting after a failure
    pub reconnect_delay: Duration,

    /// Bound on connect + channel + declare
    pub connect_timeout: Duration,

    /// Bound on a single publish
    pub publish_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            consumer_group: RedisStreamsOptions::default().consumer_group,
            publish_interval: Duration::from_millis(5000),
            reconnect_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl ProducerConfig {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_name: lookup("QUEUE_NAME").unwrap_or(defaults.queue_name),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            publish_interval: millis("PUBLISH_INTERVAL_MS", defaults.publish_interval),
            reconnect_delay: millis("RECONNECT_DELAY_MS", defaults.reconnect_delay),
            connect_timeout: secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            publish_timeout: secs("PUBLISH_TIMEOUT_SECS", defaults.publish_timeout),
        }
    }

    /// Transport settings. Only the group matters to a publisher: declaring
    /// the queue creates it so subscribers see alerts published before they
    /// first connect.
    pub fn redis_options(&self) -> RedisStreamsOptions {
        RedisStreamsOptions {
            consumer_group: self.consumer_group.clone(),
            ..Default::default()
        }
    }

    /// Reject settings the producer cannot run with.
    pub fn validate(&self) -> ProducerResult<()> {
        if self.queue_name.is_empty() {
            return Err(ProducerError::Config("queue name is empty".to_string()));
        }
        if self.consumer_group.is_empty() {
            return Err(ProducerError::Config("consumer group is empty".to_string()));
        }
        if self.publish_interval.is_zero() {
            return Err(ProducerError::Config(
                "publish interval must be greater than zero".to_string(),
            ));
        }
        if self.publish_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ProducerError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
