//! SQLite persistence for processed alerts.
//!
//! This crate provides:
//! - Async store with a dedicated SQLite thread
//! - Schema migrations
//! - Idempotent insert keyed by alert id
//! - Count queries for reporting
//!
//! The `alerts.id` primary key is the only deduplication mechanism: a
//! redelivered alert hits the constraint and is reported as
//! [`InsertOutcome::Duplicate`] instead of an error.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{StoreError, StoreResult};
pub use executor::AlertStore;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
