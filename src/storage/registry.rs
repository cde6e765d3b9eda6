//! Logical DB Registry (C3).
//!
//! A mutex-guarded set of known `dbNum`s, so registering a newly-seen
//! logical DB is safe against concurrent readers checking `contains`.

use super::SqlitePool;
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Mutex;

pub fn table_name(db: i64) -> String {
    format!("bigdis_{}", db)
}

fn create_table_ddl(db: i64) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id      INTEGER PRIMARY KEY,
            key     TEXT UNIQUE NOT NULL,
            value   BLOB NOT NULL,
            type    TEXT NOT NULL,
            exp     DATETIME NULL,
            created DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        table_name(db)
    )
}

pub struct Registry {
    known: Mutex<HashSet<i64>>,
}

impl Registry {
    /// Scan `main.sqlite_schema` for existing `bigdis_<n>` tables so a
    /// reopened database picks up the logical DBs it already has.
    pub fn scan(pool: &SqlitePool) -> Result<Self> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare("SELECT name FROM main.sqlite_schema WHERE type = 'table'")?;
        let mut rows = stmt.query([])?;
        let mut known = HashSet::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            if let Some(rest) = name.strip_prefix("bigdis_") {
                if let Ok(n) = rest.parse::<i64>() {
                    known.insert(n);
                }
            }
        }
        Ok(Self {
            known: Mutex::new(known),
        })
    }

    pub fn known_dbs(&self) -> Vec<i64> {
        self.known.lock().unwrap().iter().copied().collect()
    }

    pub fn contains(&self, db: i64) -> bool {
        self.known.lock().unwrap().contains(&db)
    }

    /// Materialize the table for `db` if it hasn't been seen yet. Cheap
    /// (a single mutex lookup) once a `dbNum` has been registered.
    pub fn ensure(&self, write_pool: &SqlitePool, db: i64) -> Result<()> {
        if self.contains(db) {
            return Ok(());
        }
        let conn = write_pool.get()?;
        conn.execute_batch(&create_table_ddl(db))?;
        self.known.lock().unwrap().insert(db);
        Ok(())
    }

    /// Drop `db`'s table. Dropping a table that was never created is
    /// tolerated; FLUSHDB on an empty logical DB is not an error.
    pub fn drop_db(&self, write_pool: &SqlitePool, db: i64) -> Result<()> {
        let conn = write_pool.get()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table_name(db)))?;
        self.known.lock().unwrap().remove(&db);
        Ok(())
    }

    pub fn drop_all(&self, write_pool: &SqlitePool) -> Result<()> {
        let dbs = self.known_dbs();
        let conn = write_pool.get()?;
        for db in &dbs {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table_name(*db)))?;
        }
        self.known.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2d2_sqlite::SqliteConnectionManager;

    fn memory_pool() -> SqlitePool {
        let manager = SqliteConnectionManager::memory();
        r2d2::Pool::builder().max_size(1).build(manager).unwrap()
    }

    #[test]
    fn scan_finds_no_tables_on_fresh_db() {
        let pool = memory_pool();
        let registry = Registry::scan(&pool).unwrap();
        assert!(registry.known_dbs().is_empty());
    }

    #[test]
    fn ensure_registers_and_is_idempotent() {
        let pool = memory_pool();
        let registry = Registry::scan(&pool).unwrap();
        registry.ensure(&pool, 0).unwrap();
        assert!(registry.contains(0));
        // second call should not error
        registry.ensure(&pool, 0).unwrap();
    }

    #[test]
    fn drop_db_removes_from_registry() {
        let pool = memory_pool();
        let registry = Registry::scan(&pool).unwrap();
        registry.ensure(&pool, 2).unwrap();
        registry.drop_db(&pool, 2).unwrap();
        assert!(!registry.contains(2));
    }

    #[test]
    fn drop_db_on_unknown_db_is_tolerated() {
        let pool = memory_pool();
        let registry = Registry::scan(&pool).unwrap();
        registry.drop_db(&pool, 99).unwrap();
    }

    #[test]
    fn drop_all_clears_everything() {
        let pool = memory_pool();
        let registry = Registry::scan(&pool).unwrap();
        registry.ensure(&pool, 0).unwrap();
        registry.ensure(&pool, 1).unwrap();
        registry.drop_all(&pool).unwrap();
        assert!(registry.known_dbs().is_empty());
    }
}
