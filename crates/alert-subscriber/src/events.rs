//! Subscriber events and the console reporter.
//!
//! The subscriber publishes one [`SubscriberEvent`] per step on a broadcast
//! channel. The binary renders them as human-readable log lines; tests
//! subscribe directly.

use alert_core::Alert;
use alert_store::AlertStats;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Capacity of the event channel. A slow reporter skips events.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// A well-formed alert arrived.
    Received {
        /// Running count of well-formed alerts.
        count: u64,
        alert: Alert,
        redelivered: bool,
    },
    /// First time this alert id was stored.
    Stored { id: String },
    /// The alert id was already stored; acked anyway.
    Duplicate { id: String },
    /// A delivery was rejected without requeue.
    Rejected { tag: String, reason: String },
    /// The store failed for a reason other than a duplicate id.
    StorageFailed { id: String, error: String },
    /// Store statistics snapshot.
    Stats(AlertStats),
}

/// Spawn a task that logs every event until the channel closes.
pub fn spawn_console_reporter(mut rx: broadcast::Receiver<SubscriberEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => report(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Reporter fell behind, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn report(event: &SubscriberEvent) {
    match event {
        SubscriberEvent::Received {
            count,
            alert,
            redelivered,
        } => {
            info!(
                count,
                id = %alert.id,
                alert_type = %alert.alert_type,
                system = %alert.system,
                message = %alert.message,
                timestamp = %alert.timestamp,
                hostname = %alert.hostname(),
                environment = %alert.environment(),
                redelivered,
                "New alert received"
            );
        }
        SubscriberEvent::Stored { id } => info!(id = %id, "Saved to database"),
        SubscriberEvent::Duplicate { id } => {
            warn!(id = %id, "Alert already exists in database")
        }
        SubscriberEvent::Rejected { tag, reason } => {
            warn!(tag = %tag, reason = %reason, "Message rejected, not requeued")
        }
        SubscriberEvent::StorageFailed { id, error } => {
            error!(id = %id, error = %error, "Failed to save alert")
        }
        SubscriberEvent::Stats(stats) => {
            info!(total = stats.total, "Database statistics");
            for entry in &stats.by_type {
                info!(alert_type = %entry.alert_type, count = entry.count, "  by type");
            }
        }
    }
}
