use std::fs;
use std::path::Path;

use anyhow::{Error, Result};
use rusqlite::Connection;

/// Open (and create if needed) the SQLite database backing the
/// persisted stores.
pub fn open_db(db_path: &str) -> Result<Connection, Error> {
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    initialize_db(&conn)?;
    Ok(conn)
}

pub fn initialize_db(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )?;
    Ok(())
}
