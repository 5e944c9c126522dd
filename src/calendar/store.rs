//! SQLite-backed store of fetched calendar events.
//!
//! The table mirrors the latest fetch: [`EventStore::store`] replaces every
//! row in one transaction.

use crate::calendar::event::Event;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events (
    event_id   TEXT PRIMARY KEY,
    date       TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time   TEXT NOT NULL,
    title      TEXT NOT NULL
)";

const SELECT_COLUMNS: &str = "SELECT event_id, date, start_time, end_time, title FROM events";

/// Event store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or schema failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database directory could not be created.
    #[error("I/O error: {0}")]
    Io(String),

    /// Connection mutex was poisoned.
    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// SQLite event table.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct EventStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace all stored events with `events`.
    ///
    /// Duplicate IDs within `events` keep the last occurrence.
    pub fn store(&self, events: &[Event]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM events", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO events (event_id, date, start_time, end_time, title) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in events {
                stmt.execute(params![e.event_id, e.date, e.start_time, e.end_time, e.title])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Earliest event starting at or after `now`.
    pub fn next_due_event(&self, now: DateTime<Utc>) -> Result<Option<Event>, StoreError> {
        let conn = self.lock()?;
        let now = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let event = conn
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE date || ' ' || start_time >= ?1 \
                     ORDER BY date, start_time LIMIT 1"
                ),
                params![now],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// All stored events ordered by date and start time.
    pub fn list(&self) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY date, start_time"))?;
        let rows = stmt.query_map([], row_to_event)?;

        let mut events = Vec::new();
        for r in rows {
            events.push(r?);
        }
        Ok(events)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        event_id: row.get(0)?,
        date: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        title: row.get(4)?,
    })
}
