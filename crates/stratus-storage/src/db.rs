//! Database connection management.
//!
//! Holds a bounded pool of rusqlite Connections. Every pooled connection is
//! opened up front, so the pool size caps both concurrent and idle
//! connections to the backing store. Configures WAL mode and recommended
//! PRAGMAs on each connection at initialization.

use std::collections::VecDeque;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use stratus_core::error::{Result, StratusError};

use crate::migrations;

/// Thread-safe SQLite database wrapper with a bounded connection pool.
///
/// `with_conn` borrows a connection, blocking while every connection is
/// checked out. Connections are never closed or re-opened after startup.
pub struct Database {
    pool: Mutex<VecDeque<Connection>>,
    available: Condvar,
}

impl Database {
    /// Open (or create) a database at the given path with a bounded pool of
    /// `max_connections` connections.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and a busy
    /// timeout on every connection, then runs all pending migrations.
    /// A `path` of ":memory:" opens a private in-memory store instead.
    pub fn open(path: &Path, max_connections: usize) -> Result<Self> {
        if path == Path::new(":memory:") {
            return Self::in_memory();
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut pool = VecDeque::with_capacity(max_connections.max(1));
        for _ in 0..max_connections.max(1) {
            let conn = Connection::open(path)
                .map_err(|e| StratusError::Storage(format!("Failed to open database: {}", e)))?;
            configure(&conn)?;
            pool.push_back(conn);
        }

        info!(
            connections = pool.len(),
            "Database opened at {}",
            path.display()
        );

        let db = Self {
            pool: Mutex::new(pool),
            available: Condvar::new(),
        };

        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    ///
    /// An in-memory store is private to a single connection, so the pool is
    /// fixed at one connection and callers serialize on it.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StratusError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        configure(&conn)?;

        let mut pool = VecDeque::with_capacity(1);
        pool.push_back(conn);

        let db = Self {
            pool: Mutex::new(pool),
            available: Condvar::new(),
        };

        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Execute a closure with a pooled connection.
    ///
    /// This is the primary way to interact with the database. The connection
    /// is held for the duration of the closure and returned to the pool
    /// afterwards, even if the closure fails.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.acquire()?;
        f(&conn)
    }

    fn acquire(&self) -> Result<PooledConn<'_>> {
        let mut pool = self
            .pool
            .lock()
            .map_err(|e| StratusError::Storage(format!("Connection pool poisoned: {}", e)))?;
        loop {
            if let Some(conn) = pool.pop_front() {
                return Ok(PooledConn {
                    db: self,
                    conn: Some(conn),
                });
            }
            pool = self
                .available
                .wait(pool)
                .map_err(|e| StratusError::Storage(format!("Connection pool poisoned: {}", e)))?;
        }
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push_back(conn);
            self.available.notify_one();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// A connection checked out of the pool; returns itself on drop.
struct PooledConn<'a> {
    db: &'a Database,
    conn: Option<Connection>,
}

impl Deref for PooledConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.db.release(conn);
        }
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
    .map_err(|e| StratusError::Storage(format!("Failed to set pragmas: {}", e)))?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|e| StratusError::Storage(format!("Failed to set busy timeout: {}", e)))?;
    Ok(())
}
