//! Prefetch-bounded consumer.
//!
//! A feeder task pulls deliveries from a [`QueueChannel`] and hands them to
//! the caller over a bounded channel. Before every fetch the feeder takes a
//! permit from a semaphore sized to the prefetch limit; the permit travels
//! inside the [`InFlight`] and is only returned when that delivery is acked
//! or rejected. With a prefetch of 1 the next message cannot even be fetched
//! until the current one is settled.

use crate::error::{QueueError, QueueResult};
use crate::transport::{Delivery, QueueChannel};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A delivery holding one prefetch slot until it is settled.
///
/// Dropping an `InFlight` without settling frees the slot but leaves the
/// message unacknowledged; the broker redelivers it later.
pub struct InFlight {
    delivery: Delivery,
    channel: Arc<dyn QueueChannel>,
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn payload(&self) -> &[u8] {
        &self.delivery.payload
    }

    pub fn tag(&self) -> &str {
        &self.delivery.tag
    }

    /// Acknowledge, then release the prefetch slot.
    pub async fn ack(self) -> QueueResult<()> {
        self.channel.ack(&self.delivery).await
    }

    /// Reject, then release the prefetch slot.
    pub async fn reject(self, requeue: bool) -> QueueResult<()> {
        self.channel.reject(&self.delivery, requeue).await
    }
}

/// Receiving end of a consumer registration.
pub struct Consumer {
    rx: mpsc::Receiver<QueueResult<InFlight>>,
    feeder: JoinHandle<()>,
    queue: String,
    prefetch: usize,
}

impl Consumer {
    /// Start consuming `queue` with at most `prefetch` unsettled deliveries.
    pub fn start(channel: Arc<dyn QueueChannel>, queue: &str, prefetch: usize) -> Self {
        let prefetch = prefetch.max(1);
        let permits = Arc::new(Semaphore::new(prefetch));
        let (tx, rx) = mpsc::channel(prefetch);
        let feeder = tokio::spawn(feed(channel, queue.to_string(), permits, tx));

        debug!(queue = %queue, prefetch, "Consumer started");

        Self {
            rx,
            feeder,
            queue: queue.to_string(),
            prefetch,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Next delivery. Cancel safe.
    ///
    /// A transport failure is yielded once as `Err`, after which the
    /// consumer is finished and yields `Err(ConsumerClosed)`.
    pub async fn next(&mut self) -> QueueResult<InFlight> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(QueueError::ConsumerClosed),
        }
    }

    /// Stop fetching. Deliveries not yet handed out stay unacknowledged.
    pub async fn cancel(mut self) {
        self.rx.close();
        self.feeder.abort();
        let _ = (&mut self.feeder).await;
        debug!(queue = %self.queue, "Consumer cancelled");
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}

async fn feed(
    channel: Arc<dyn QueueChannel>,
    queue: String,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<QueueResult<InFlight>>,
) {
    loop {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        if tx.is_closed() {
            break;
        }

        match channel.fetch(&queue).await {
            Ok(Some(delivery)) => {
                debug!(queue = %queue, tag = %delivery.tag, "Delivery received");
                let in_flight = InFlight {
                    delivery,
                    channel: channel.clone(),
                    _permit: permit,
                };
                if tx.send(Ok(in_flight)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                // Block window elapsed with nothing to deliver.
                drop(permit);
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "Fetch failed, stopping consumer");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}
