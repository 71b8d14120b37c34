//! The subscriber loop.
//!
//! One session = connect, open a channel, declare the queue, then consume
//! with a prefetch of one. Each delivery is handled to completion before the
//! next one is even fetched:
//!
//! ```text
//! delivery -> parse -> insert by id -> ack     (stored or duplicate)
//!                   \             \--> reject  (storage failure)
//!                    \-------------> reject    (malformed)
//! ```
//!
//! Rejections never requeue. A failed ack or reject, or a lost consumer,
//! ends the session; the broker redelivers the unsettled message and the
//! duplicate path absorbs it.

use crate::config::SubscriberConfig;
use crate::error::{SubscriberError, SubscriberResult};
use crate::events::{SubscriberEvent, EVENT_CAPACITY};
use alert_core::{Alert, Service, Shutdown};
use alert_queue::{Broker, Consumer, Delivery, InFlight, QueueSession};
use alert_store::{AlertStore, InsertOutcome, NewAlertRow};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// At most one delivery is unsettled at any time.
pub const PREFETCH: usize = 1;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored for the first time.
    Stored,
    /// Already stored by an earlier delivery.
    Duplicate,
    /// Not a valid alert.
    Malformed,
    /// The store failed for another reason.
    StorageFailed,
}

impl Outcome {
    /// Stored and duplicate deliveries are acked; the rest are rejected.
    pub fn should_ack(&self) -> bool {
        matches!(self, Self::Stored | Self::Duplicate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Duplicate => "duplicate",
            Self::Malformed => "malformed",
            Self::StorageFailed => "storage_failed",
        }
    }
}

/// Per-subscriber counters, kept across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberCounters {
    /// Well-formed alerts received, duplicates included.
    pub received: u64,
    pub stored: u64,
    pub duplicates: u64,
    /// Deliveries rejected without requeue.
    pub rejected: u64,
    pub storage_failures: u64,
}

/// Consumes alerts and persists each id exactly once.
pub struct Subscriber {
    broker: Arc<dyn Broker>,
    store: AlertStore,
    config: SubscriberConfig,
    counters: SubscriberCounters,
    events: broadcast::Sender<SubscriberEvent>,
}

impl Subscriber {
    pub fn new(broker: Arc<dyn Broker>, store: AlertStore, config: SubscriberConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            broker,
            store,
            config,
            counters: SubscriberCounters::default(),
            events,
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn counters(&self) -> SubscriberCounters {
        self.counters
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SubscriberEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Read store statistics and publish them as an event.
    pub async fn emit_stats(&self) {
        match self.store.stats().await {
            Ok(stats) => {
                debug!(total = stats.total, "Store statistics read");
                self.emit(SubscriberEvent::Stats(stats));
            }
            Err(e) => warn!(error = %e, "Failed to read store statistics"),
        }
    }

    /// Parse and persist one delivery. Never fails: every error is an outcome.
    pub async fn process(&mut self, delivery: &Delivery) -> Outcome {
        let alert = match Alert::from_payload(&delivery.payload) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(tag = %delivery.tag, error = %e, "Malformed alert payload");
                return Outcome::Malformed;
            }
        };

        self.counters.received += 1;
        self.emit(SubscriberEvent::Received {
            count: self.counters.received,
            alert: alert.clone(),
            redelivered: delivery.redelivered,
        });

        let row = NewAlertRow::from_alert(&alert, Utc::now());
        match self.store.insert(row).await {
            Ok(InsertOutcome::Inserted) => {
                self.counters.stored += 1;
                self.emit(SubscriberEvent::Stored { id: alert.id });
                Outcome::Stored
            }
            Ok(InsertOutcome::Duplicate) => {
                self.counters.duplicates += 1;
                self.emit(SubscriberEvent::Duplicate { id: alert.id });
                Outcome::Duplicate
            }
            Err(e) => {
                self.counters.storage_failures += 1;
                error!(id = %alert.id, error = %e, "Storage failure, message will be rejected");
                self.emit(SubscriberEvent::StorageFailed {
                    id: alert.id,
                    error: e.to_string(),
                });
                Outcome::StorageFailed
            }
        }
    }

    /// Process one delivery and settle it.
    pub async fn handle(&mut self, in_flight: InFlight) -> SubscriberResult<Outcome> {
        let outcome = self.process(in_flight.delivery()).await;
        let tag = in_flight.tag().to_string();

        if outcome.should_ack() {
            in_flight.ack().await?;
            debug!(tag = %tag, outcome = outcome.as_str(), "Message acknowledged");

            // Counted on received alerts, so duplicates advance the interval.
            let every = self.config.stats_every;
            if every > 0 && self.counters.received % every == 0 {
                self.emit_stats().await;
            }
        } else {
            in_flight.reject(false).await?;
            self.counters.rejected += 1;
            self.emit(SubscriberEvent::Rejected {
                tag,
                reason: outcome.as_str().to_string(),
            });
        }

        Ok(outcome)
    }

    /// Emit final statistics and close the store.
    pub async fn finish(self) -> SubscriberResult<SubscriberCounters> {
        self.emit_stats().await;
        let counters = self.counters;
        self.store.close().await?;
        info!(
            received = counters.received,
            stored = counters.stored,
            duplicates = counters.duplicates,
            rejected = counters.rejected,
            storage_failures = counters.storage_failures,
            "Subscriber finished"
        );
        Ok(counters)
    }
}

#[async_trait]
impl Service for Subscriber {
    type Error = SubscriberError;

    async fn run(&mut self, mut shutdown: Shutdown) -> SubscriberResult<()> {
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

        info!(queue = %session.queue(), prefetch = PREFETCH, "Subscriber active, waiting for messages");
        self.emit_stats().await;

        let mut consumer = Consumer::start(session.channel(), session.queue(), PREFETCH);

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Stopping subscriber");
                    break Ok(());
                }
                next = consumer.next() => next,
            };

            // Handled outside the select so shutdown never interrupts a message.
            match next {
                Ok(in_flight) => {
                    if let Err(e) = self.handle(in_flight).await {
                        warn!(error = %e, "Failed to settle message, ending session");
                        break Err(e);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Consumer stopped, ending session");
                    break Err(e.into());
                }
            }
        };

        consumer.cancel().await;
        session.close().await;
        result
    }
}
