//! SQLite-backed result and error cache.
//!
//! Two namespaces: `results` holds finished reports keyed by notebook base
//! name, `errors` holds rejection records keyed by full path. Payloads are
//! JSON. Every operation opens its own short-lived connection so callers
//! never manage connection lifetime; writes additionally serialize through a
//! process-local lock because parallel sweeps share one database file.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::report::NotebookReport;
use crate::store::schema;

/// Rejection record for a notebook that never reached the repair loop, or
/// whose run failed outright.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub nb_path: String,
    pub status: String,
}

/// Result/error cache over one SQLite file.
pub struct ResultStore {
    db_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultStore {
    /// Open (creating if needed) the cache at `db_path` and ensure the
    /// schema exists.
    pub fn open(db_path: &Path) -> Result<ResultStore> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = ResultStore {
            db_path: db_path.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        let conn = store.connect()?;
        schema::init_schema(&conn)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    // -- results ------------------------------------------------------------

    pub fn set_result(&self, key: &str, report: &NotebookReport) -> Result<()> {
        let payload = serde_json::to_string(report)?;
        let _guard = self.write_lock.lock();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO results(key, payload) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload;",
            params![key, payload],
        )?;
        Ok(())
    }

    pub fn get_result(&self, key: &str) -> Result<Option<NotebookReport>> {
        let conn = self.connect()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM results WHERE key = ?1;", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains_result(&self, key: &str) -> Result<bool> {
        Ok(self.get_result(key)?.is_some())
    }

    /// Every cached report in insertion order, for export.
    pub fn all_results(&self) -> Result<Vec<(String, NotebookReport)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT key, payload FROM results ORDER BY created_at, key;")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut results = Vec::new();
        for row in rows {
            let (key, payload) = row?;
            results.push((key, serde_json::from_str(&payload)?));
        }
        Ok(results)
    }

    // -- errors -------------------------------------------------------------

    pub fn set_error(&self, key: &str, record: &ErrorRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO errors(key, payload) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload;",
            params![key, payload],
        )?;
        Ok(())
    }

    pub fn get_error(&self, key: &str) -> Result<Option<ErrorRecord>> {
        let conn = self.connect()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM errors WHERE key = ?1;", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains_error(&self, key: &str) -> Result<bool> {
        Ok(self.get_error(key)?.is_some())
    }
}
