//! The producer loop.
//!
//! One session = connect, open a channel, declare the queue, then publish
//! one alert immediately and one per interval until shutdown. A failed
//! publish drops that alert and the loop goes on; only a lost connection
//! ends the session, which the supervisor then restarts.

use crate::config::ProducerConfig;
use crate::error::{ProducerError, ProducerResult};
use alert_core::{Alert, AlertSource, Service, Shutdown};
use alert_queue::{with_timeout, Broker, PublishProperties, QueueChannel, QueueSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Publish counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Alerts accepted by the broker.
    pub published: u64,
    /// Alerts dropped after a failed publish.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
}

/// Read-only view of a running producer's counters.
#[derive(Debug, Clone)]
pub struct StatsHandle(Arc<Counters>);

impl StatsHandle {
    pub fn snapshot(&self) -> ProducerStats {
        ProducerStats {
            published: self.0.published.load(Ordering::Relaxed),
            failed: self.0.failed.load(Ordering::Relaxed),
        }
    }
}

/// Publishes alerts from an [`AlertSource`] to the durable queue.
pub struct Producer {
    broker: Arc<dyn Broker>,
    source: Box<dyn AlertSource>,
    config: ProducerConfig,
    counters: Arc<Counters>,
}

impl Producer {
    pub fn new(
        broker: Arc<dyn Broker>,
        source: Box<dyn AlertSource>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            broker,
            source,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats_handle().snapshot()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(self.counters.clone())
    }

    /// Generate and publish one alert.
    ///
    /// Returns `Err` only when the connection is gone; every other failure
    /// drops the alert.
    async fn publish_one(&mut self, channel: &dyn QueueChannel, queue: &str) -> ProducerResult<()> {
        let alert = self.source.next_alert();

        match self.send(&alert, channel, queue).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    id = %alert.id,
                    alert_type = %alert.alert_type,
                    system = %alert.system,
                    message = %alert.message,
                    "Alert published"
                );
                Ok(())
            }
            Err(e) if e.ends_session() => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(id = %alert.id, error = %e, "Connection lost while publishing, dropping alert");
                Err(e)
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(id = %alert.id, error = %e, "Failed to publish alert, dropping it");
                Ok(())
            }
        }
    }

    async fn send(&self, alert: &Alert, channel: &dyn QueueChannel, queue: &str) -> ProducerResult<()> {
        let payload = alert.to_payload()?;
        with_timeout(
            "publish confirmation",
            self.config.publish_timeout,
            channel.publish(queue, &payload, PublishProperties::default()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Service for Producer {
    type Error = ProducerError;

    async fn run(&mut self, mut shutdown: Shutdown) -> ProducerResult<()> {
        info!(
            url = %self.config.redis_url,
            queue = %self.config.queue_name,
            "Connecting to broker"
        );

        let establish = QueueSession::establish(
            self.broker.as_ref(),
            &self.config.redis_url,
            &self.config.queue_name,
            self.config.connect_timeout,
        );

        let session = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Shutdown requested while connecting");
                return Ok(());
            }
            result = establish => result?,
        };

        info!(
            queue = %session.queue(),
            interval_ms = self.config.publish_interval.as_millis() as u64,
            "Producer active"
        );

        let channel = session.channel();
        let mut ticker = tokio::time::interval(self.config.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick completes immediately: one alert goes out on startup.
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Stopping producer");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_one(channel.as_ref(), session.queue()).await {
                        warn!(error = %e, "Ending producer session");
                        break Err(e);
                    }
                }
            }
        };

        drop(channel);
        session.close().await;

        let stats = self.stats();
        info!(
            published = stats.published,
            failed = stats.failed,
            "Producer session closed"
        );

        result
    }
}
