//! SQLite backend.
//!
//! [`Database`] owns one connection; [`queries`] holds the typed statements
//! for rules, identities, mappings, applications and the static mapping
//! tables, and [`crate::store::sqlite`] puts the async store traits on top.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// The bridge's SQLite connection, shared by every store trait.
///
/// File databases run in WAL mode. Foreign keys are enforced so an
/// identity's legacy ID rows go with it.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file at `path`. Call
    /// [`initialize`](Self::initialize) before use.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database, gone when dropped.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), StoreError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Lock the connection. A lock poisoned by a panicking holder is taken
    /// over; an open transaction was rolled back when it was dropped.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one transaction: committed on `Ok`, rolled back on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idbridge.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), StoreError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO user_identities (id, display_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params!["id-1", "Ada", "2025-01-01T00:00:00Z"],
            )?;
            Err(StoreError::not_found("test", "forced"))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM user_identities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_connection_survives_panicking_holder() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        std::thread::scope(|scope| {
            let holder = scope.spawn(|| {
                let _conn = db.conn();
                panic!("holder dies with the lock");
            });
            assert!(holder.join().is_err());
        });

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM user_identities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
