//! Transport-neutral queue client contract.
//!
//! `Broker::connect` yields a [`QueueConnection`], which opens
//! [`QueueChannel`]s. All acknowledgement is explicit: a delivery stays
//! unacknowledged until the caller acks or rejects it.

use crate::error::{with_timeout, QueueResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Queue declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue survives broker restarts.
    pub durable: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Per-message publish properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishProperties {
    /// Message survives broker restarts.
    pub persistent: bool,
}

impl Default for PublishProperties {
    fn default() -> Self {
        Self { persistent: true }
    }
}

/// A message handed to a consumer and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned identifier used to ack or reject.
    pub tag: String,
    /// Queue the message was read from.
    pub queue: String,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// The broker delivered this message before without a settlement.
    pub redelivered: bool,
}

/// Entry point to a durable-queue service.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a connection. Network and auth failures are `QueueError::Connection`.
    async fn connect(&self, url: &str) -> QueueResult<Box<dyn QueueConnection>>;
}

/// An established broker connection.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Open a channel on this connection. Fails with `QueueError::Channel`.
    async fn open_channel(&self) -> QueueResult<Arc<dyn QueueChannel>>;

    async fn close(&self) -> QueueResult<()>;
}

/// A channel: the unit that declares, publishes, fetches and settles.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Declare a queue. Idempotent when the queue already exists.
    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> QueueResult<()>;

    /// Publish one message. Returns once the broker has accepted it.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: PublishProperties,
    ) -> QueueResult<()>;

    /// Fetch at most one message.
    ///
    /// Returns `Ok(None)` when nothing arrived within the transport's block
    /// window. Callers bound concurrency; see [`crate::Consumer`].
    async fn fetch(&self, queue: &str) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Reject a delivery. `requeue = false` discards it permanently.
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> QueueResult<()>;

    async fn close(&self) -> QueueResult<()>;
}

/// Connection, channel and declared queue, established as one unit.
pub struct QueueSession {
    connection: Box<dyn QueueConnection>,
    channel: Arc<dyn QueueChannel>,
    queue: String,
}

impl QueueSession {
    /// Connect, open a channel and declare `queue` as durable.
    ///
    /// The whole sequence is bounded by `connect_timeout`.
    pub async fn establish(
        broker: &dyn Broker,
        url: &str,
        queue: &str,
        connect_timeout: Duration,
    ) -> QueueResult<Self> {
        with_timeout("connection setup", connect_timeout, async {
            let connection = broker.connect(url).await?;
            let channel = match connection.open_channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    let _ = connection.close().await;
                    return Err(e);
                }
            };
            if let Err(e) = channel.declare_queue(queue, QueueOptions::default()).await {
                let _ = channel.close().await;
                let _ = connection.close().await;
                return Err(e);
            }

            info!(queue = %queue, "Queue session established");

            Ok(Self {
                connection,
                channel,
                queue: queue.to_string(),
            })
        })
        .await
    }

    pub fn channel(&self) -> Arc<dyn QueueChannel> {
        self.channel.clone()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Close the channel, then the connection.
    pub async fn close(self) {
        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Failed to close channel");
        }
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close connection");
        }
        info!(queue = %self.queue, "Queue session closed");
    }
}
