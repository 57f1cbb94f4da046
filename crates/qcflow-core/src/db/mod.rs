//! SQLite storage utilities.
//!
//! Connection defaults:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout` (5s unless configured) so writers from other processes
//!   queue on the database lock instead of failing
//! - `foreign_keys = ON` to protect relational integrity between items,
//!   defects, requests, reviews, images and events

pub mod migrations;
pub mod query;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used when the configuration does not override it.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the qcflow database, apply runtime pragmas, and migrate
/// schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_database(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open database {}", path.display()))?;

    configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply schema migrations")?;

    Ok(conn)
}

/// Open a fresh in-memory database with the full schema and seed data.
///
/// # Errors
///
/// Returns an error if the migrations fail.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    migrations::migrate(&mut conn).context("apply schema migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, open_database, open_in_memory};
    use crate::db::migrations;
    use std::time::Duration;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("nested").join("qcflow.db");
        (dir, path)
    }

    #[test]
    fn open_database_sets_wal_busy_timeout_and_fk() {
        let (_dir, path) = temp_db_path();
        let conn = open_database(&path, DEFAULT_BUSY_TIMEOUT).expect("open db");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(
            u128::from(busy_timeout_ms),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn open_database_honours_custom_busy_timeout() {
        let (_dir, path) = temp_db_path();
        let conn = open_database(&path, Duration::from_millis(750)).expect("open db");
        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(busy_timeout_ms, 750);
    }

    #[test]
    fn open_database_runs_migrations_and_seeds() {
        let (_dir, path) = temp_db_path();
        let conn = open_database(&path, DEFAULT_BUSY_TIMEOUT).expect("open db");

        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);

        let statuses: i64 = conn
            .query_row("SELECT COUNT(*) FROM item_statuses", [], |row| row.get(0))
            .expect("count statuses");
        assert_eq!(statuses, 7);
    }

    #[test]
    fn in_memory_database_enforces_foreign_keys() {
        let conn = open_in_memory().expect("open in-memory db");
        let result = conn.execute(
            "INSERT INTO item_defects (item_id, defect_type_id, created_at_us) VALUES (999, 1, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
