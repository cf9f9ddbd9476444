//! SQLite database for console state persistence

use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Expose the underlying connection for subsystems that manage their own
    /// tables within the shared state DB.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize the shared schema; domain tables are created by their owners.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Key-value store for misc console state
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // ========================================================================
    // Key-value store
    // ========================================================================

    /// Set a key-value pair
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;

        Ok(())
    }

    /// Get a value by key
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();

        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Delete a key
    pub fn kv_delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_store() {
        let db = Database::open_memory().unwrap();

        db.kv_set("last_export_at", "1700000000").unwrap();
        assert_eq!(
            db.kv_get("last_export_at").unwrap().as_deref(),
            Some("1700000000")
        );

        db.kv_set("last_export_at", "1700000001").unwrap();
        assert_eq!(
            db.kv_get("last_export_at").unwrap().as_deref(),
            Some("1700000001")
        );

        db.kv_delete("last_export_at").unwrap();
        assert!(db.kv_get("last_export_at").unwrap().is_none());
    }
}
