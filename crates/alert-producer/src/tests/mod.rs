//! Integration tests for the producer.
//!
//! - `harness.rs`         - Sequenced alert source, producer runner
//! - `cadence.rs`         - Immediate first publish, fixed interval, persistence
//! - `publish_failure.rs` - Refused and unconfirmed publishes drop the alert
//! - `reconnect.rs`       - Startup and mid-session connection failures

mod cadence;
mod publish_failure;
mod reconnect;
