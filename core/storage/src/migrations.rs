//! Schema migrations for the queue database.
//!
//! Each migration upgrades the schema by one version. The version is kept
//! in `PRAGMA user_version`; migrations run when the store is opened.

use rusqlite::Connection;
use tracing::{debug, info};

use repsync_common::{Error, MutationKind, Result};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Table backing a kind's queue segment.
pub fn table_name(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::SetWrite => "set_queue",
        MutationKind::SessionAction => "session_action_queue",
        MutationKind::WeightLogWrite => "weight_log_queue",
    }
}

/// Read the schema version. A fresh database reports 0.
pub fn get_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {e}")))
}

fn set_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| Error::Storage(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        debug!("Queue schema is current (v{})", current);
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        info!("Migrating queue schema to v{}", version);
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::Storage(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// v1: one table per kind with ascending, never-reused ids.
fn migrate_v1(conn: &Connection) -> Result<()> {
    for kind in MutationKind::ALL {
        let table = table_name(kind);
        conn.execute_batch(&format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_{table}_synced ON {table}(synced);
            "
        ))
        .map_err(|e| Error::Storage(format!("Migration v1 failed: {e}")))?;
    }
    Ok(())
}

/// v2: retry bookkeeping. Existing rows get `retry_count = 0`.
fn migrate_v2(conn: &Connection) -> Result<()> {
    for kind in MutationKind::ALL {
        let table = table_name(kind);
        add_column_if_missing(conn, table, "retry_count", "INTEGER NOT NULL DEFAULT 0")?;
        add_column_if_missing(conn, table, "last_attempt_at", "INTEGER")?;
        add_column_if_missing(conn, table, "last_error", "TEXT")?;
    }
    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {column} {definition};"
    ))
    .map_err(|e| Error::Storage(format!("Failed to add {table}.{column}: {e}")))
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| Error::Storage(e.to_string()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| Error::Storage(e.to_string()))?;

    for name in names {
        if name.map_err(|e| Error::Storage(e.to_string()))? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_reach_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_version(&conn).unwrap(), 0);

        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        for kind in MutationKind::ALL {
            assert!(has_column(&conn, table_name(kind), "retry_count").unwrap());
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_v2_rerun_after_version_reset() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        // Columns already exist; replaying v2 must not fail.
        set_version(&conn, 1).unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_v2_backfills_existing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        set_version(&conn, 1).unwrap();

        conn.execute(
            "INSERT INTO weight_log_queue (payload, enqueued_at) VALUES ('{}', 1700000000000)",
            [],
        )
        .unwrap();

        run(&conn).unwrap();

        let (retry_count, last_error): (i64, Option<String>) = conn
            .query_row(
                "SELECT retry_count, last_error FROM weight_log_queue WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(retry_count, 0);
        assert!(last_error.is_none());
    }
}
