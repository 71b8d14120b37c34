//! Error types for the subscriber.

use alert_queue::QueueError;
use alert_store::StoreError;
use thiserror::Error;

/// Subscriber error type.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// Broker connection, channel or settlement failure
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Store could not be opened or closed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for subscriber operations.
pub type SubscriberResult<T> = Result<T, SubscriberError>;
