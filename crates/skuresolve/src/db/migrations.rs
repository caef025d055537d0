//! Schema versions of the job store.
//!
//! Applied versions are recorded in `_migrations`. Each pending version runs
//! in its own transaction together with its bookkeeping row.

use rusqlite::{params, Connection, OptionalExtension};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        name: "create_job_rows_table",
        sql: include_str!("sql/002_create_job_rows.sql"),
    },
];

/// Highest version recorded as applied, 0 for a fresh database.
pub fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM _migrations", [], |r| r.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = applied_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration).map_err(|e| match e {
            DatabaseError::Sqlite(source) => DatabaseError::Migration {
                version: migration.version,
                reason: source.to_string(),
            },
            other => other,
        })?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    log::info!("Applying migration v{} ({})", migration.version, migration.name);
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )?;
    tx.commit()?;
    Ok(())
}
