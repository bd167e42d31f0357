//! Event store schema migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

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

    if current_version >= CURRENT_VERSION {
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running event store migrations");

    if current_version < 1 {
        apply(conn, 1, "events", migrate_v1_events)?;
    }
    if current_version < 2 {
        apply(conn, 2, "encoded_sizes", migrate_v2_encoded_sizes)?;
    }

    Ok(())
}

/// Run one migration and record it atomically, so a crash never leaves a
/// half-applied version behind.
fn apply(
    conn: &Connection,
    version: i32,
    name: &str,
    migrate: fn(&Connection) -> StoreResult<()>,
) -> StoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    migrate(&tx)?;
    record_migration(&tx, version, name)?;
    tx.commit()?;
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

/// V1: pending events table.
///
/// AUTOINCREMENT keeps ids from being reused after the newest row is deleted.
fn migrate_v1_events(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

/// V2: precomputed wire sizes so batching never re-serializes.
fn migrate_v2_encoded_sizes(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE events ADD COLUMN post_size INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE events ADD COLUMN get_size INTEGER NOT NULL DEFAULT 0;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn events_table_has_size_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (payload, post_size, get_size) VALUES ('{}', 2, 0)",
            [],
        )
        .unwrap();
        let post_size: i64 = conn
            .query_row("SELECT post_size FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(post_size, 2);
    }

    #[test]
    fn failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        // A get_size column makes the second ALTER of v2 fail.
        conn.execute_batch(
            "CREATE TABLE events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                get_size INTEGER NOT NULL DEFAULT 0
            );",
        )
        .unwrap();

        assert!(run_migrations(&conn).is_err());

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
        let post_size_columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('events') WHERE name = 'post_size'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(post_size_columns, 0);
    }
}
