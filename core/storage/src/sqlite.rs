//! SQLite-backed mutation queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use repsync_common::{Error, MutationId, MutationKind, Result};

use crate::migrations::{self, table_name};
use crate::queue::{MutationQueue, PendingMutation};

const COLUMNS: &str =
    "id, payload, enqueued_at, synced, retry_count, last_attempt_at, last_error";

/// Durable queue stored in a SQLite database.
///
/// Each instance owns its connection, so separate instances never share
/// state unless they open the same file.
pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Open (or create) a queue database and bring its schema up to date.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        let queue = Self::from_connection(conn)?;

        info!("Mutation queue opened at {}", db_path.display());
        Ok(queue)
    }

    /// Create a queue that lives only for the lifetime of the value.
    ///
    /// Not durable; intended for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Queue connection lock poisoned".to_string()))
    }

    fn query_records(
        &self,
        kind: MutationKind,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PendingMutation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE {filter} ORDER BY id ASC",
            table_name(kind)
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let rows = stmt
            .query_map(params, |row| row_to_record(kind, row))
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl MutationQueue for SqliteQueue {
    async fn enqueue(
        &self,
        kind: MutationKind,
        payload: serde_json::Value,
        enqueued_at: DateTime<Utc>,
    ) -> Result<MutationId> {
        let payload = serde_json::to_string(&payload)?;
        let conn = self.conn()?;

        conn.execute(
            &format!(
                "INSERT INTO {} (payload, enqueued_at, synced, retry_count) VALUES (?1, ?2, 0, 0)",
                table_name(kind)
            ),
            params![payload, enqueued_at.timestamp_millis()],
        )
        .map_err(|e| Error::Storage(format!("Failed to enqueue {kind}: {e}")))?;

        let id = MutationId::new(conn.last_insert_rowid());
        debug!("Enqueued {} #{}", kind, id);
        Ok(id)
    }

    async fn list_pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
        self.query_records(kind, "synced = 0", &[])
    }

    async fn get(&self, kind: MutationKind, id: MutationId) -> Result<Option<PendingMutation>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM {} WHERE id = ?1", table_name(kind)),
            params![id.get()],
            |row| row_to_record(kind, row),
        )
        .optional()
        .map_err(db_err)
    }

    async fn mark_synced(&self, kind: MutationKind, id: MutationId) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                &format!("UPDATE {} SET synced = 1 WHERE id = ?1", table_name(kind)),
                params![id.get()],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("{kind} #{id}")));
        }
        debug!("Marked {} #{} synced", kind, id);
        Ok(())
    }

    async fn mark_failed(
        &self,
        kind: MutationKind,
        id: MutationId,
        error: &str,
        attempted_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let table = table_name(kind);

        // Single statement: the synced guard and the increment cannot interleave
        // with a concurrent mark_synced.
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {table}
                     SET retry_count = retry_count + 1, last_attempt_at = ?2, last_error = ?3
                     WHERE id = ?1 AND synced = 0"
                ),
                params![id.get(), attempted_at.timestamp_millis(), error],
            )
            .map_err(db_err)?;

        if changed > 0 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row(
                &format!("SELECT synced FROM {table} WHERE id = ?1"),
                params![id.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match exists {
            Some(_) => {
                warn!("Ignoring failure for already synced {} #{}", kind, id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("{kind} #{id}"))),
        }
    }

    async fn purge_synced(&self, kind: MutationKind) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE synced = 1", table_name(kind)),
                [],
            )
            .map_err(db_err)?;

        if removed > 0 {
            debug!("Purged {} synced {} records", removed, kind);
        }
        Ok(removed)
    }

    async fn count_pending(&self, kind: MutationKind) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE synced = 0", table_name(kind)),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    async fn list_abandoned(
        &self,
        kind: MutationKind,
        max_retries: u32,
    ) -> Result<Vec<PendingMutation>> {
        self.query_records(kind, "synced = 0 AND retry_count >= ?1", &[&max_retries])
    }
}

fn row_to_record(kind: MutationKind, row: &Row<'_>) -> rusqlite::Result<PendingMutation> {
    let payload: String = row.get(1)?;
    let payload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PendingMutation {
        id: MutationId::new(row.get(0)?),
        kind,
        payload,
        enqueued_at: millis_to_datetime(row.get(2)?),
        synced: row.get::<_, i64>(3)? != 0,
        retry_count: row.get::<_, i64>(4)?.max(0) as u32,
        last_attempt_at: row.get::<_, Option<i64>>(5)?.map(millis_to_datetime),
        last_error: row.get(6)?,
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn db_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}
