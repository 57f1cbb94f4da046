//! SQLite schema migrations for the qcflow database.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 4;

const MIGRATIONS: &[(u32, &str)] = &[
    (1, schema::MIGRATION_V1_SQL),
    (2, schema::MIGRATION_V2_SQL),
    (3, schema::MIGRATION_V3_SQL),
    (4, schema::MIGRATION_V4_SQL),
];

/// Version that first seeds the reference catalogs.
const SEED_VERSION: u32 = 4;

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// Migrations are idempotent because:
/// - each migration only runs when `migration.version > user_version`
/// - DDL uses `IF NOT EXISTS` and seed rows use `INSERT OR IGNORE`
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE schema_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        if *version == SEED_VERSION {
            tx.execute(
                "UPDATE schema_meta
                 SET seeded_at_us = CAST((julianday('now') - 2440587.5) * 86400000000 AS INTEGER)
                 WHERE id = 1",
                [],
            )?;
        }
        tx.commit()?;
        tracing::debug!(version, "applied schema migration");
        current = *version;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, current_schema_version, migrate};
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn sqlite_object_exists(
        conn: &Connection,
        object_type: &str,
        object_name: &str,
    ) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            )",
            params![object_type, object_name],
            |row| row.get(0),
        )
    }

    #[test]
    fn migrate_empty_db_to_latest() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        let applied = migrate(&mut conn)?;
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);

        for table in [
            "item_statuses",
            "defect_types",
            "items",
            "item_defects",
            "reviews",
            "item_images",
            "item_events",
            "status_change_requests",
            "status_change_request_defects",
            "schema_meta",
        ] {
            assert!(
                sqlite_object_exists(&conn, "table", table)?,
                "missing table {table}"
            );
        }

        for index in schema::REQUIRED_INDEXES {
            assert!(
                sqlite_object_exists(&conn, "index", index)?,
                "missing expected index {index}"
            );
        }

        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let meta_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM schema_meta", [], |row| row.get(0))?;
        assert_eq!(meta_rows, 1);

        let defect_types: i64 =
            conn.query_row("SELECT COUNT(*) FROM defect_types", [], |row| row.get(0))?;
        assert_eq!(defect_types, 5);

        let (schema_version, seeded_at): (i64, i64) = conn.query_row(
            "SELECT schema_version, seeded_at_us FROM schema_meta WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(schema_version, i64::from(LATEST_SCHEMA_VERSION));
        assert!(seeded_at > 0);

        Ok(())
    }

    #[test]
    fn migrate_upgrades_from_v1_without_losing_items() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        conn.execute(
            "INSERT INTO item_statuses (status_id, code, name, display_order)
             VALUES (100, 'NORMAL', 'Normal (legacy)', 50)",
            [],
        )?;
        conn.execute(
            "INSERT INTO items (station, line_id, detected_at_us, status_id,
                created_at_us, updated_at_us)
             VALUES ('ROLL', 1, 10, 100, 10, 10)",
            [],
        )?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let (items, normal_name): (i64, String) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM items),
                    (SELECT name FROM item_statuses WHERE code = 'NORMAL')",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(items, 1);
        // Seeding never overwrites an existing catalog entry.
        assert_eq!(normal_name, "Normal (legacy)");

        let statuses: i64 =
            conn.query_row("SELECT COUNT(*) FROM item_statuses", [], |row| row.get(0))?;
        assert_eq!(statuses, 7);

        Ok(())
    }
}
