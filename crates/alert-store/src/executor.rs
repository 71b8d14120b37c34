//! Async alert store on a dedicated SQLite thread.
//!
//! All statements are sent to one background thread and run in FIFO order,
//! keeping the Tokio runtime free while SQLite works.
//!
//! ```ignore
//! let store = AlertStore::open(path).await?;
//! let outcome = store.insert(NewAlertRow::from_alert(&alert, Utc::now())).await?;
//! let stats = store.stats().await?;
//! ```
//!
//! Only SQL should run inside [`AlertStore::call`].

use crate::{
    migrations, queries, AlertRow, AlertStats, InsertOutcome, NewAlertRow, StoreError,
    StoreResult, TypeCount,
};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Connection("Connection closed".to_string())
        }
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Idempotent alert store.
///
/// Cloning is cheap; clones share the executor thread.
#[derive(Clone)]
pub struct AlertStore {
    conn: Connection,
    path: String,
}

impl AlertStore {
    /// Open the store at `path`.
    ///
    /// Creates the parent directory and the file if absent, enables WAL and
    /// runs pending migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening alert store");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        let store = Self {
            conn,
            path: path_str,
        };
        store.call(migrations::run_migrations).await?;

        info!(path = %store.path, "Alert store initialized with WAL mode");
        Ok(store)
    }

    /// Open a private in-memory store.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            conn,
            path: ":memory:".to_string(),
        };
        store.call(migrations::run_migrations).await?;
        Ok(store)
    }

    /// Execute a closure on the store's connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked until it returns.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Carry our own result through tokio_rusqlite's Ok variant.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Insert an alert. An existing id yields [`InsertOutcome::Duplicate`].
    pub async fn insert(&self, row: NewAlertRow) -> StoreResult<InsertOutcome> {
        self.call(move |conn| queries::insert_alert(conn, &row)).await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<AlertRow>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_alert(conn, &id)).await
    }

    pub async fn count_by_type(&self) -> StoreResult<Vec<TypeCount>> {
        self.call(queries::count_by_type).await
    }

    pub async fn total_count(&self) -> StoreResult<i64> {
        self.call(queries::total_count).await
    }

    /// Total and per-type counts from a single snapshot.
    pub async fn stats(&self) -> StoreResult<AlertStats> {
        self.call(queries::stats).await
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check the store answers a trivial query.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1"))
            .await?;
        debug!("Store health check passed");
        Ok(())
    }

    /// Close the store after pending operations complete.
    pub async fn close(self) -> StoreResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to close store: {:?}", e)))?;
        info!(path = %self.path, "Alert store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{Alert, AlertMetadata, AlertType};
    use chrono::Utc;
    use tempfile::tempdir;

    fn alert(id: &str, alert_type: AlertType) -> Alert {
        Alert {
            id: id.to_string(),
            alert_type,
            system: "Backup".to_string(),
            message: "Backup finished".to_string(),
            timestamp: "2024-06-10T06:13:20.000Z".to_string(),
            metadata: Some(AlertMetadata {
                hostname: Some("server-4".to_string()),
                environment: Some("production".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("data").join("alerts.db");

        let store = AlertStore::open(&db_path).await.unwrap();
        assert!(store.health_check().await.is_ok());
        assert!(db_path.exists());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = AlertStore::open_in_memory().await.unwrap();
        let a1 = alert("A1", AlertType::Critical);
        let a2 = alert("A2", AlertType::Info);

        let outcomes = vec![
            store.insert(NewAlertRow::from_alert(&a1, Utc::now())).await.unwrap(),
            store.insert(NewAlertRow::from_alert(&a2, Utc::now())).await.unwrap(),
            store.insert(NewAlertRow::from_alert(&a1, Utc::now())).await.unwrap(),
        ];

        assert_eq!(
            outcomes,
            vec![
                InsertOutcome::Inserted,
                InsertOutcome::Inserted,
                InsertOutcome::Duplicate
            ]
        );
        assert_eq!(store.total_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_metadata_stored_as_unknown() {
        let store = AlertStore::open_in_memory().await.unwrap();
        let mut bare = alert("A9", AlertType::Warning);
        bare.metadata = None;

        store
            .insert(NewAlertRow::from_alert(&bare, Utc::now()))
            .await
            .unwrap();

        let row = store.get("A9").await.unwrap().unwrap();
        assert_eq!(row.hostname.as_deref(), Some("unknown"));
        assert_eq!(row.environment.as_deref(), Some("unknown"));
        assert_eq!(row.alert_type, "WARNING");
        assert_eq!(row.timestamp, "2024-06-10T06:13:20.000Z");
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("alerts.db");

        let store = AlertStore::open(&db_path).await.unwrap();
        store
            .insert(NewAlertRow::from_alert(&alert("A1", AlertType::Error), Utc::now()))
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = AlertStore::open(&db_path).await.unwrap();
        let outcome = reopened
            .insert(NewAlertRow::from_alert(&alert("A1", AlertType::Error), Utc::now()))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(reopened.stats().await.unwrap().count_for("ERROR"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_same_id() {
        let store = AlertStore::open_in_memory().await.unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert(NewAlertRow::from_alert(&alert("A1", AlertType::Info), Utc::now()))
                    .await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.total_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generic_failure_is_not_a_duplicate() {
        let store = AlertStore::open_in_memory().await.unwrap();
        store
            .call_sqlite(|conn| conn.execute_batch("DROP TABLE alerts"))
            .await
            .unwrap();

        let result = store
            .insert(NewAlertRow::from_alert(&alert("A1", AlertType::Info), Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }
}
