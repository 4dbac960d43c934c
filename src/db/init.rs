use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub fn init_db_at(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    // image_paths holds a JSON array in timeline order.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS recordings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            audio_path TEXT,
            audio_mime TEXT,
            image_paths TEXT NOT NULL DEFAULT '[]',
            context_text TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            result TEXT,
            summary TEXT,
            metadata TEXT,
            started_at TIMESTAMP,
            completed_at TIMESTAMP,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create recordings table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recordings_created_at ON recordings(created_at DESC)",
        [],
    )
    .context("Failed to create recordings created_at index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recordings_status ON recordings(status)",
        [],
    )
    .context("Failed to create recordings status index")?;

    Ok(())
}
