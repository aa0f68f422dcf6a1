//! Durable key/value backend over SQLite.
//!
//! One `kv` table, opened with WAL and a `user_version` pragma guard so the
//! schema statement runs exactly once per database file.

use std::path::Path;

use directories::ProjectDirs;
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::kv::KvBackend;

/// Current schema version.
const CURRENT_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// [`KvBackend`] backed by a [`rusqlite::Connection`].
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) the default application database in the
    /// platform-appropriate data directory:
    /// - Linux:   `~/.local/share/roomwatch/roomwatch.db`
    /// - macOS:   `~/Library/Application Support/io.roomwatch.roomwatch/roomwatch.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\roomwatch\roomwatch\data\roomwatch.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("io", "roomwatch", "roomwatch").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("roomwatch.db");

        info!(path = %db_path.display(), "opening key/value database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current < CURRENT_VERSION {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "user_version", CURRENT_VERSION)?;
        }

        Ok(Self { conn })
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM kv", [])?;
        info!(removed, "wiped kv table");
        Ok(())
    }
}
