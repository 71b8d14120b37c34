//! Durable queue client for the alert pipeline.
//!
//! Producers publish persistent messages to a durable queue; subscribers
//! consume them one at a time with explicit acknowledgement.
//!
//! # Guarantees
//!
//! 1. **Explicit ACK**: a delivery stays unacknowledged until acked or rejected
//! 2. **One In-Flight**: with a prefetch of 1 the next message is not fetched
//!    before the current one is settled
//! 3. **At-Least-Once**: an unsettled delivery is handed out again. The
//!    in-memory broker requeues it when its connection goes away; on Redis
//!    the same consumer gets it back from its pending list on restart, and
//!    any other consumer claims it once it has been idle for
//!    `claim_min_idle_ms`
//!
//! # Transports
//!
//! - [`RedisBroker`]: Redis Streams with a consumer group
//! - `MemoryBroker`: in-process broker with fault injection, for tests
//!   (feature `memory`)
//!
//! ```text
//! Producer --publish--> queue --fetch--> Consumer --> InFlight
//!                         ^                              |
//!                         |______ ack / reject <_________|
//! ```

pub mod consumer;
pub mod error;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod redis_streams;
pub mod transport;

#[cfg(test)]
mod tests;

pub use consumer::{Consumer, InFlight};
pub use error::{with_timeout, QueueError, QueueResult};
#[cfg(any(test, feature = "memory"))]
pub use memory::{JournalEntry, MemoryBroker};
pub use redis_streams::{RedisBroker, RedisStreamsOptions};
pub use transport::{
    Broker, Delivery, PublishProperties, QueueChannel, QueueConnection, QueueOptions,
    QueueSession,
};
