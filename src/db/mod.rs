pub mod migrations;
pub mod queries;
pub mod sqlite;

use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

pub use sqlite::SqliteStore;

/// How long a booking write waits for another writer's `BEGIN IMMEDIATE` lock.
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the booking database, apply pending migrations and seed the catalog.
pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open booking database at {path}"))?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;
    conn.busy_timeout(WRITE_LOCK_TIMEOUT)
        .context("failed to set busy timeout")?;

    migrations::run_migrations(&conn)?;
    tracing::info!(path, "booking database ready");

    Ok(conn)
}
