//! Query functions over a plain `&Connection`.
//!
//! Each function takes a `&Connection` as its first parameter, so they run
//! unchanged inside [`crate::AlertStore::call`] or against a test connection.

use crate::{AlertRow, AlertStats, InsertOutcome, NewAlertRow, StoreResult, TypeCount};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::debug;

/// Whether `err` is a primary-key violation. Other constraint failures are not.
pub fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Insert an alert, reporting an existing id as [`InsertOutcome::Duplicate`].
pub fn insert_alert(conn: &Connection, row: &NewAlertRow) -> StoreResult<InsertOutcome> {
    let result = conn.execute(
        "INSERT INTO alerts (id, type, system, message, timestamp, hostname, environment, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.id,
            row.alert_type,
            row.system,
            row.message,
            row.timestamp,
            row.hostname,
            row.environment,
            row.received_at,
        ],
    );

    match result {
        Ok(_) => {
            debug!(id = %row.id, "Alert inserted");
            Ok(InsertOutcome::Inserted)
        }
        Err(e) if is_primary_key_violation(&e) => {
            debug!(id = %row.id, "Alert already stored");
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

/// Get an alert by id.
pub fn get_alert(conn: &Connection, id: &str) -> StoreResult<Option<AlertRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, type, system, message, timestamp, hostname, environment, received_at, created_at
         FROM alerts WHERE id = ?1",
    )?;

    let row = stmt
        .query_row(params![id], |row| {
            Ok(AlertRow {
                id: row.get(0)?,
                alert_type: row.get(1)?,
                system: row.get(2)?,
                message: row.get(3)?,
                timestamp: row.get(4)?,
                hostname: row.get(5)?,
                environment: row.get(6)?,
                received_at: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Stored alerts per type, highest count first.
pub fn count_by_type(conn: &Connection) -> StoreResult<Vec<TypeCount>> {
    let mut stmt = conn.prepare_cached(
        "SELECT type, COUNT(*) AS count FROM alerts GROUP BY type ORDER BY count DESC, type ASC",
    )?;

    let counts = stmt
        .query_map([], |row| {
            Ok(TypeCount {
                alert_type: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(counts)
}

/// Number of stored alerts.
pub fn total_count(conn: &Connection) -> StoreResult<i64> {
    let total = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
    Ok(total)
}

/// Total and per-type counts read in one transaction.
pub fn stats(conn: &Connection) -> StoreResult<AlertStats> {
    let tx = conn.unchecked_transaction()?;
    let total = total_count(&tx)?;
    let by_type = count_by_type(&tx)?;
    tx.commit()?;
    Ok(AlertStats { total, by_type })
}
