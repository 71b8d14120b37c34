//! Error types for the queue client.

use std::time::Duration;
use thiserror::Error;

/// Queue client error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker unreachable, refused, or rejected credentials
    #[error("Connection error: {0}")]
    Connection(String),

    /// Channel could not be opened or was used after close
    #[error("Channel error: {0}")]
    Channel(String),

    /// Redis operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Unexpected broker response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker did not accept a published message
    #[error("Publish error: {0}")]
    Publish(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: &'static str, after: Duration },

    /// The consumer's feeder task stopped
    #[error("Consumer closed")]
    ConsumerClosed,
}

impl QueueError {
    /// Whether the error means the connection itself is unusable.
    ///
    /// Connection-level errors end the current session so the supervisor can
    /// reconnect; anything else is scoped to a single operation.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Channel(_) | Self::Timeout { .. } | Self::ConsumerClosed => {
                true
            }
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            Self::Protocol(_) | Self::Publish(_) => false,
        }
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Bound `fut` by `after`, mapping expiry to [`QueueError::Timeout`].
pub async fn with_timeout<T, F>(what: &'static str, after: Duration, fut: F) -> QueueResult<T>
where
    F: std::future::Future<Output = QueueResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout { what, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_level_classification() {
        assert!(QueueError::Connection("refused".into()).is_connection_level());
        assert!(QueueError::Channel("closed".into()).is_connection_level());
        assert!(QueueError::Timeout {
            what: "connect",
            after: Duration::from_secs(1)
        }
        .is_connection_level());
        assert!(!QueueError::Publish("nack".into()).is_connection_level());
        assert!(!QueueError::Protocol("bad reply".into()).is_connection_level());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: QueueResult<()> = with_timeout(
            "publish confirmation",
            Duration::from_secs(5),
            std::future::pending(),
        )
        .await;

        match result {
            Err(QueueError::Timeout { what, after }) => {
                assert_eq!(what, "publish confirmation");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
