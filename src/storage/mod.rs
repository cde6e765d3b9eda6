//! Storage Engine Handle (C1).
//!
//! Owns the write pool (exactly one connection, since SQLite serializes
//! writers anyway) and read pool (several connections) against the same
//! embedded SQLite file, plus the Logical DB Registry.

pub mod registry;
pub mod set_options;
pub mod strings;
pub mod txn;

use crate::config::Config;
use crate::error::Result;
use r2d2_sqlite::SqliteConnectionManager;
use registry::Registry;
use rusqlite::OpenFlags;

pub use txn::{PooledConn, SqlitePool, Transaction};

/// Read pool size. A generous fixed cap avoids one misbehaving client
/// starving the others of read connections.
const READ_POOL_SIZE: u32 = 16;

const INIT_SQL: &str = "
    CREATE TABLE IF NOT EXISTS bigdis_schema_meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    INSERT OR IGNORE INTO bigdis_schema_meta (key, value) VALUES ('schema_version', '1');
";

pub struct StorageEngine {
    write_pool: SqlitePool,
    read_pool: SqlitePool,
    registry: Registry,
}

impl StorageEngine {
    /// One-shot initialization. Any failure here is fatal to process start.
    pub fn open(cfg: &Config) -> Result<Self> {
        let is_memory = cfg.storage_path == ":memory:";

        let write_pool = r2d2::Pool::builder()
            .max_size(1)
            .build(connection_manager(cfg, is_memory))?;
        let read_pool = r2d2::Pool::builder()
            .max_size(READ_POOL_SIZE)
            .build(connection_manager(cfg, is_memory))?;

        {
            let conn = write_pool.get()?;
            conn.execute_batch(INIT_SQL)?;
        }

        let registry = Registry::scan(&write_pool)?;

        let detected = registry.known_dbs();
        if detected.is_empty() {
            log::info!("No DB detected, initializing...");
        } else {
            log::info!("Detected non-empty DBs: {:?}", detected);
        }

        Ok(Self {
            write_pool,
            read_pool,
            registry,
        })
    }

    pub fn write_pool(&self) -> &SqlitePool {
        &self.write_pool
    }

    pub fn read_pool(&self) -> &SqlitePool {
        &self.read_pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Lazily materialize `db`'s table. Every command primitive calls this
    /// before touching `bigdis_<db>`, so the table exists on first reference
    /// to any `dbNum`, not only on `SELECT`.
    pub fn ensure_db(&self, db: i64) -> Result<()> {
        self.registry.ensure(&self.write_pool, db)
    }

    pub fn flushdb(&self, db: i64) -> Result<()> {
        let mut tx = Transaction::begin(&self.write_pool)?;
        let was = tx.chain();
        tx.conn()
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", registry::table_name(db)))?;
        if !was {
            tx.unchain();
        }
        tx.end()?;
        // Only drop from the registry once the transaction actually
        // committed; a rolled-back drop must leave the table registered.
        self.registry.drop_db(&self.write_pool, db).ok();
        Ok(())
    }

    pub fn flushall(&self) -> Result<()> {
        let dbs = self.registry.known_dbs();
        let mut tx = Transaction::begin(&self.write_pool)?;
        let was = tx.chain();
        for db in &dbs {
            tx.conn()
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", registry::table_name(*db)))?;
        }
        if !was {
            tx.unchain();
        }
        tx.end()?;
        self.registry.drop_all(&self.write_pool).ok();
        Ok(())
    }
}

fn connection_manager(cfg: &Config, is_memory: bool) -> SqliteConnectionManager {
    let journal_mode = cfg.journal_mode.clone();
    let synchronous = cfg.synchronous.clone();

    let manager = if is_memory {
        // Shared-cache mode so both pools see the same in-memory database.
        SqliteConnectionManager::file("file::memory:?cache=shared").with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    } else {
        SqliteConnectionManager::file(&cfg.storage_path)
    };

    manager.with_init(move |conn| {
        conn.execute_batch(&format!(
            "PRAGMA auto_vacuum = 1;
             PRAGMA journal_mode = {};
             PRAGMA synchronous = {};
             PRAGMA busy_timeout = 20000;",
            journal_mode, synchronous
        ))
    })
}
