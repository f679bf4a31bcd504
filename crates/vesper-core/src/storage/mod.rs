//! Storage Module
//!
//! SQLite backing for the semantic tier (graph store, skill library,
//! consolidation bookkeeping). Uses a separate writer/reader connection pair
//! for interior mutability: all methods take `&self`, so handles are
//! `Send + Sync` and the tool layer can share an `Arc<Database>` without an
//! outer mutex.

mod migrations;

pub use migrations::{apply_migrations, Migration, MIGRATIONS};

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{Result, VesperError};

/// Shared SQLite database handle
pub struct Database {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Database {
    /// Apply performance PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at `path` and run pending migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(path)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Open a database under a directory, using the canonical file name
    pub fn open_in_dir(dir: &Path) -> Result<Self> {
        Self::open(&PathBuf::from(dir).join("vesper.db"))
    }

    /// Run a closure against the writer connection
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| VesperError::Init("Writer lock poisoned".to_string()))?;
        f(&mut conn)
    }

    /// Run a closure against the reader connection
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .reader
            .lock()
            .map_err(|_| VesperError::Init("Reader lock poisoned".to_string()))?;
        f(&conn)
    }
}

// ============================================================================
// TESTS
// ============================================================================
