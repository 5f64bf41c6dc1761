//! SQLite-backed handoff store.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use dr_core::{Error, HandoffStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS handoff (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
)";

fn store_error<E: std::fmt::Display>(message: E) -> Error {
    Error::tool("handoff", message.to_string())
}

pub struct SqliteHandoffStore {
    conn: Mutex<Connection>,
}

impl SqliteHandoffStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = db_path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_error(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(&path)
            .map_err(|e| store_error(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_error(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute(SCHEMA, [])
            .map_err(|e| store_error(format!("Failed to create table: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn.lock().map_err(|_| store_error("connection lock poisoned"))
    }
}

impl HandoffStore for SqliteHandoffStore {
    fn write(&self, key: &str, value: &str) -> Result<(), Error> {
        self.conn()?
            .execute(
                "INSERT INTO handoff (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                params![key, value],
            )
            .map_err(|e| store_error(format!("Failed to write '{}': {}", key, e)))?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>, Error> {
        self.conn()?
            .query_row("SELECT value FROM handoff WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(|e| store_error(format!("Failed to read '{}': {}", key, e)))
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM handoff ORDER BY key")
            .map_err(store_error)?;

        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(store_error)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(store_error)?;

        Ok(keys)
    }
}
