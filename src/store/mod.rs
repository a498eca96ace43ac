//! Durable key-value storage for the registries. Each registry owns a
//! single named blob that it rewrites on every mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Error, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};

use crate::core::db::open_db;

pub const CHATS_STORE: &str = "chats-store";
pub const PROMPTS_STORE: &str = "prompts-store";

/// Synchronous blob storage. Writes are visible to any read issued
/// after `set` returns.
pub trait KvStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, Error>;
    fn set(&self, name: &str, value: &str) -> Result<(), Error>;
}

pub type SharedStore = Arc<dyn KvStore>;

/// SQLite backed store used by the CLI.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self, Error> {
        let conn = open_db(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE name = ?", [name], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))?;
        conn.execute(
            "INSERT INTO kv (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![name, value],
        )?;
        Ok(())
    }
}

/// In-memory store, mostly for tests.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(blobs.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        blobs.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
