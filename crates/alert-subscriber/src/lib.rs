//! Alert subscriber: consumes alerts from a durable queue one at a time and
//! persists each alert id exactly once.
//!
//! # Guarantees
//!
//! 1. **One In-Flight**: prefetch of one, insert-then-ack without locking
//! 2. **Idempotent**: a redelivered alert hits the store's primary key and is
//!    acked as a duplicate
//! 3. **No Poison Loops**: malformed or unstorable messages are rejected
//!    without requeue
//! 4. **Reconnect**: session failures restart after a fixed delay (see
//!    [`alert_core::Supervisor`])

pub mod config;
pub mod error;
pub mod events;
pub mod subscriber;

#[cfg(test)]
mod tests;

pub use config::SubscriberConfig;
pub use error::{SubscriberError, SubscriberResult};
pub use events::{spawn_console_reporter, SubscriberEvent};
pub use subscriber::{Outcome, Subscriber, SubscriberCounters, PREFETCH};
