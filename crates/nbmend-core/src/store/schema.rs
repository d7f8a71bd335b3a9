//! SQLite schema DDL for the result/error cache.

use rusqlite::Connection;

use crate::errors::Result;

/// Current schema version, recorded in `store_meta` on init.
pub const SCHEMA_VERSION: i32 = 1;

/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS results (
        key TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS errors (
        key TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_results_created ON results(created_at);",
    "CREATE INDEX IF NOT EXISTS idx_errors_created ON errors(created_at);",
];

/// Apply the schema and stamp the version.
pub fn init_schema(conn: &Connection) -> Result<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version; 0 when absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: std::result::Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}
