//! SQLite database module

mod kv_store;
mod migrations;

use crate::error::Result;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;

/// SQLite database wrapper
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Create new SQLite database connection
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::from_connection(conn)
    }

    /// In-memory database, nothing survives a restart
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }
}

#[async_trait]
impl KeyValueStore for SqliteDb {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        kv_store::get_value(&conn, key)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let conn = self.conn.lock();
        kv_store::set_value(&conn, key, &value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        kv_store::delete_value(&conn, key)
    }
}
