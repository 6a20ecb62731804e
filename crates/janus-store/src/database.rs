use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::migrations::MIGRATIONS;
use janus_core::{JanusError, Result};

/// Handle to the embedded relational store. Clone-cheap; all statement
/// execution is serialized through the inner connection lock, and
/// multi-row operations that must be atomic use explicit transactions.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    durable: bool,
}

impl Database {
    /// Open (or create) the store at `path`: parent directory created,
    /// WAL and foreign keys enabled, outstanding migrations applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| JanusError::Storage(format!("open {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| JanusError::Storage(e.to_string()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            durable: true,
        };
        db.migrate()?;
        info!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// In-memory store: used by tests and as the scheduler's non-durable
    /// fallback when the on-disk store cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| JanusError::Storage(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| JanusError::Storage(e.to_string()))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            durable: false,
        };
        db.migrate()?;
        Ok(db)
    }

    /// Whether this store survives restarts. Surfaced in observability
    /// output so degraded mode is visible.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Serialized access to the raw connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Apply outstanding migrations and advance the `user_version` counter.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        let applied: usize = conn
            .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
            .map_err(|e| JanusError::Storage(e.to_string()))? as usize;

        if applied > MIGRATIONS.len() {
            return Err(JanusError::Storage(format!(
                "database is ahead of this build: {applied} migrations applied, {} known",
                MIGRATIONS.len()
            )));
        }

        for (index, script) in MIGRATIONS.iter().enumerate().skip(applied) {
            debug!(migration = index + 1, "applying migration");
            conn.execute_batch(&format!("BEGIN; {script} COMMIT;"))
                .map_err(|e| {
                    JanusError::Storage(format!("migration {} failed: {e}", index + 1))
                })?;
            conn.pragma_update(None, "user_version", (index + 1) as i64)
                .map_err(|e| JanusError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    pub fn applied_migrations(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| JanusError::Storage(e.to_string()))?;
        Ok(version as usize)
    }
}
