//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
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

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_events(conn)?;
    }
    if current_version < 2 {
        migrate_v2_eligibility_index(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: events table.
///
/// Timestamps are stored as epoch milliseconds so the lease predicate is a
/// plain integer comparison.
fn migrate_v1_events(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: events table");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            aggregate_id TEXT NOT NULL,
            event_topic TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload BLOB NOT NULL,
            status TEXT NOT NULL DEFAULT 'new' CHECK (status IN ('new', 'done')),
            created_at INTEGER NOT NULL,
            reserved_to INTEGER
        );
        ",
    )?;

    record_migration(conn, 1, "events")
}

/// V2: index backing the eligible-events scan.
fn migrate_v2_eligibility_index(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: eligibility index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_events_status_reserved_to
            ON events(status, reserved_to);
        CREATE INDEX IF NOT EXISTS idx_events_created_at
            ON events(created_at);
        ",
    )?;

    record_migration(conn, 2, "eligibility_index")
}
