//! Transaction Controller (C2).
//!
//! An explicit scope guard around one pooled connection: a composed
//! primitive takes `&mut Transaction` and decides itself whether to
//! `chain()` before calling an inner primitive, so only the outermost
//! primitive that began the transaction ever commits it. `Drop` rolls back
//! anything that was never `end()`-ed, making a forgotten rollback
//! impossible rather than a convention every call site has to remember.

use crate::error::Result;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub struct Transaction {
    conn: PooledConn,
    chained: bool,
    ended: bool,
}

impl Transaction {
    /// Begin a transaction on `pool`. `BEGIN IMMEDIATE` takes the write
    /// lock up front: a transaction never silently upgrades from a read
    /// lock to a write lock underneath another connection.
    pub fn begin(pool: &SqlitePool) -> Result<Self> {
        let conn = pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            chained: false,
            ended: false,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mark this transaction as owned by an enclosing primitive; returns
    /// the previous chained state so the caller can restore it. While
    /// chained, `end()` is a no-op — only the outermost primitive that
    /// began the transaction actually commits it.
    pub fn chain(&mut self) -> bool {
        let prior = self.chained;
        self.chained = true;
        prior
    }

    pub fn unchain(&mut self) {
        self.chained = false;
    }

    /// Commit unless chained. On commit failure, roll back before
    /// returning the error. Calling `end()` more than once is harmless.
    pub fn end(&mut self) -> Result<()> {
        if self.chained || self.ended {
            return Ok(());
        }
        self.ended = true;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
