//! Alert producer: publishes one synthetic alert per interval to a durable
//! queue as a persistent message.
//!
//! # Behaviour
//!
//! 1. **Immediate first publish**: one alert on startup, then one per interval
//! 2. **Drop on failure**: a failed publish is logged and that alert is lost
//! 3. **Reconnect**: connection failures restart the whole session after a
//!    fixed delay (see [`alert_core::Supervisor`])
//!
//! ```text
//! AlertSource -> Producer -> publish(persistent) -> queue
//! ```

pub mod config;
pub mod error;
pub mod producer;

#[cfg(test)]
mod tests;

pub use config::ProducerConfig;
pub use error::{ProducerError, ProducerResult};
pub use producer::{Producer, ProducerStats, StatsHandle};
