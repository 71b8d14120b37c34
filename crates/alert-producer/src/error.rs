//! Error types for the producer.

use alert_queue::QueueError;
use thiserror::Error;

/// Producer error type.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Broker connection, channel or publish failure
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Alert could not be encoded
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProducerError {
    /// Whether a publish failure ends the session. Anything else costs one
    /// alert and the loop goes on. An unconfirmed publish is not treated as
    /// a lost connection.
    pub fn ends_session(&self) -> bool {
        match self {
            Self::Queue(QueueError::Timeout { .. }) => false,
            Self::Queue(e) => e.is_connection_level(),
            Self::Encode(_) | Self::Config(_) => false,
        }
    }
}

/// Result type for producer operations.
pub type ProducerResult<T> = Result<T, ProducerError>;
