//! Shared building blocks for the alert pipeline.
//!
//! - [`Alert`]: the record exchanged between producer and subscriber
//! - [`RandomAlertGenerator`]: synthesizes alerts for the producer
//! - [`Shutdown`]: broadcast-backed shutdown signal
//! - [`Supervisor`]: restarts a side after a fixed delay on failure

pub mod alert;
pub mod generator;
pub mod shutdown;
pub mod supervisor;

pub use alert::{Alert, AlertMetadata, AlertParseError, AlertType, UNKNOWN_METADATA};
pub use generator::{AlertSource, RandomAlertGenerator};
pub use shutdown::{listen_for_signals, Shutdown};
pub use supervisor::{Service, Supervisor, SupervisorReport, DEFAULT_RETRY_DELAY};
