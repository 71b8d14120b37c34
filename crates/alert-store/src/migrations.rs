//! Store migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{StoreError, StoreResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current_version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_alerts(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: alerts table keyed by alert id.
fn migrate_v1_alerts(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: alerts");

    // The primary key on id is the only deduplication mechanism.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            system TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            hostname TEXT,
            environment TEXT,
            received_at TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_type ON alerts(type);
        ",
    )?;

    record_migration(conn, 1, "alerts")?;
    Ok(())
}
