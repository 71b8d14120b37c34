//! Integration tests for the subscriber.
//!
//! - `harness.rs`         - MemoryBroker + in-memory store runner, alert builders
//! - `ack.rs`             - Stored and duplicate deliveries are acked
//! - `malformed.rs`       - Invalid payloads are rejected without requeue
//! - `ordering.rs`        - One delivery in flight, processed in queue order
//! - `redelivery.rs`      - Unsettled deliveries come back and are absorbed
//! - `storage_failure.rs` - Store faults reject the message and keep consuming
//! - `reconnect.rs`       - Broker outages restart the session
//! - `stats.rs`           - Statistics at startup, every N stored, at finish

mod malformed;
mod redelivery;
