//! String Command Layer (C4).
//!
//! Implements GET/SET/GETSET/GETDEL/DEL/EXISTS/INCRBY family/APPEND/STRLEN/
//! MGET/MSET/MSETNX/SETNX; composed commands drive an explicit `Transaction`
//! rather than a chained-operation convention. Every write path calls
//! `StorageEngine::ensure_db` first so a previously-unseen logical DB gets
//! its table lazily, on first reference.

use super::registry::table_name;
use super::set_options::{Existence, Expiration, SetOptions};
use super::{StorageEngine, Transaction};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::collections::HashMap;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Outcome of a SET call. `NoOp` means an existence precondition (NX/XX)
/// failed and nothing was written; `Written` means the upsert happened.
/// Both carry the prior value when the caller asked for it with the `GET`
/// token (`None` otherwise, or when there was no prior row).
#[derive(Debug, PartialEq, Eq)]
pub enum SetOutcome {
    Written(Option<Vec<u8>>),
    NoOp(Option<Vec<u8>>),
}

fn fetch_raw(
    conn: &Connection,
    db: i64,
    key: &[u8],
) -> Result<Option<(Vec<u8>, String, Option<i64>)>> {
    conn.query_row(
        &format!(
            "SELECT value, type, exp FROM {} WHERE key = ?1",
            table_name(db)
        ),
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
    .map_err(Error::from)
}

/// GET's read semantics: missing row → `None`; wrong `type` → error;
/// expired row → `None`; otherwise the value.
fn logical_value(conn: &Connection, db: i64, key: &[u8], now: i64) -> Result<Option<Vec<u8>>> {
    match fetch_raw(conn, db, key)? {
        None => Ok(None),
        Some((value, ty, exp)) => {
            if ty != "s" {
                return Err(Error::WrongType);
            }
            if let Some(e) = exp {
                if e < now {
                    return Ok(None);
                }
            }
            Ok(Some(value))
        }
    }
}

fn get_in_tx(tx: &mut Transaction, db: i64, key: &[u8], now: i64) -> Result<Option<Vec<u8>>> {
    logical_value(tx.conn(), db, key, now)
}

/// Type-agnostic, expiry-aware presence check, used by NX/XX and EXISTS.
fn raw_presence(conn: &Connection, db: i64, key: &[u8], now: i64) -> Result<bool> {
    let exp: Option<Option<i64>> = conn
        .query_row(
            &format!("SELECT exp FROM {} WHERE key = ?1", table_name(db)),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match exp {
        None => false,
        Some(Some(e)) if e < now => false,
        Some(_) => true,
    })
}

fn prior_exp(conn: &Connection, db: i64, key: &[u8]) -> Result<Option<i64>> {
    let exp: Option<Option<i64>> = conn
        .query_row(
            &format!("SELECT exp FROM {} WHERE key = ?1", table_name(db)),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exp.flatten())
}

fn upsert(conn: &Connection, db: i64, key: &[u8], value: &[u8], exp: Option<i64>, now: i64) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (key, value, type, exp, created, updated) VALUES (?1, ?2, 's', ?3, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, type = 's', exp = excluded.exp, updated = excluded.updated",
            table_name(db)
        ),
        params![key, value, exp, now],
    )?;
    Ok(())
}

fn simple_set_in_tx(tx: &mut Transaction, db: i64, key: &[u8], value: &[u8]) -> Result<()> {
    upsert(tx.conn(), db, key, value, None, now_ms())
}

/// GET(key). RP, read-only.
pub fn get(engine: &StorageEngine, db: i64, key: &[u8]) -> Result<Option<Vec<u8>>> {
    engine.ensure_db(db)?;
    let conn = engine.read_pool().get()?;
    logical_value(&conn, db, key, now_ms())
}

/// SET(key, value, opts). WP. Covers both the simple and extended forms;
/// `opts` is `SetOptions::default()` for the simple form.
pub fn set(engine: &StorageEngine, db: i64, key: &[u8], value: &[u8], opts: SetOptions) -> Result<SetOutcome> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let now = now_ms();

    let prior = if opts.get {
        logical_value(tx.conn(), db, key, now)?
    } else {
        None
    };

    if let Some(existence) = opts.existence {
        let present = raw_presence(tx.conn(), db, key, now)?;
        let satisfied = match existence {
            Existence::Nx => !present,
            Existence::Xx => present,
        };
        if !satisfied {
            tx.end()?;
            return Ok(SetOutcome::NoOp(prior));
        }
    }

    let resolved_exp = match opts.expiration {
        None => None,
        Some(Expiration::KeepTtl) => prior_exp(tx.conn(), db, key)?,
        Some(Expiration::Ex(seconds)) => Some(now + seconds.saturating_mul(1000)),
        Some(Expiration::Px(millis)) => Some(now + millis),
        Some(Expiration::ExAt(seconds)) => Some(seconds.saturating_mul(1000)),
        Some(Expiration::PxAt(millis)) => Some(millis),
    };

    upsert(tx.conn(), db, key, value, resolved_exp, now)?;
    tx.end()?;
    Ok(SetOutcome::Written(prior))
}

/// GETSET(key, new) — composes GET then a simple SET in one WP transaction.
pub fn getset(engine: &StorageEngine, db: i64, key: &[u8], new_value: &[u8]) -> Result<Option<Vec<u8>>> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let was = tx.chain();
    let now = now_ms();
    let prior = get_in_tx(&mut tx, db, key, now)?;
    simple_set_in_tx(&mut tx, db, key, new_value)?;
    if !was {
        tx.unchain();
    }
    tx.end()?;
    Ok(prior)
}

/// GETDEL(key) — composes GET then a type-guarded DELETE.
pub fn getdel(engine: &StorageEngine, db: i64, key: &[u8]) -> Result<Option<Vec<u8>>> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let was = tx.chain();
    let now = now_ms();
    let prior = get_in_tx(&mut tx, db, key, now)?;
    if prior.is_some() {
        tx.conn().execute(
            &format!("DELETE FROM {} WHERE key = ?1 AND type = 's'", table_name(db)),
            params![key],
        )?;
    }
    if !was {
        tx.unchain();
    }
    tx.end()?;
    Ok(prior)
}

/// DEL(keys...) — one DELETE per key, counting attempted deletions rather
/// than affected rows (see DESIGN.md's open-question decision).
pub fn del(engine: &StorageEngine, db: i64, keys: &[Vec<u8>]) -> Result<i64> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let table = table_name(db);
    let mut count = 0i64;
    for key in keys {
        tx.conn()
            .execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])?;
        count += 1;
    }
    tx.end()?;
    Ok(count)
}

/// EXISTS(keys...) — RP, duplicates counted per occurrence.
pub fn exists(engine: &StorageEngine, db: i64, keys: &[Vec<u8>]) -> Result<i64> {
    engine.ensure_db(db)?;
    let conn = engine.read_pool().get()?;
    let now = now_ms();
    let mut count = 0i64;
    for key in keys {
        if raw_presence(&conn, db, key, now)? {
            count += 1;
        }
    }
    Ok(count)
}

/// INCRBY(key, delta) — composes GET, decimal parse, checked add, simple SET.
pub fn incrby(engine: &StorageEngine, db: i64, key: &[u8], delta: i64) -> Result<i64> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let was = tx.chain();
    let now = now_ms();
    let existing = get_in_tx(&mut tx, db, key, now)?;
    let current: i64 = match existing {
        None => 0,
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::NotInteger)?,
    };
    let sum = current.checked_add(delta).ok_or(Error::NotInteger)?;
    simple_set_in_tx(&mut tx, db, key, sum.to_string().as_bytes())?;
    if !was {
        tx.unchain();
    }
    tx.end()?;
    Ok(sum)
}

pub fn incr(engine: &StorageEngine, db: i64, key: &[u8]) -> Result<i64> {
    incrby(engine, db, key, 1)
}

pub fn decr(engine: &StorageEngine, db: i64, key: &[u8]) -> Result<i64> {
    incrby(engine, db, key, -1)
}

pub fn decrby(engine: &StorageEngine, db: i64, key: &[u8], n: i64) -> Result<i64> {
    let negated = n.checked_neg().ok_or(Error::NotInteger)?;
    incrby(engine, db, key, negated)
}

/// APPEND(key, suffix) → new length. Composes GET then a simple SET.
pub fn append(engine: &StorageEngine, db: i64, key: &[u8], suffix: &[u8]) -> Result<i64> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let was = tx.chain();
    let now = now_ms();
    let existing = get_in_tx(&mut tx, db, key, now)?;
    let mut new_value = existing.unwrap_or_default();
    new_value.extend_from_slice(suffix);
    simple_set_in_tx(&mut tx, db, key, &new_value)?;
    if !was {
        tx.unchain();
    }
    tx.end()?;
    Ok(new_value.len() as i64)
}

/// STRLEN(key). RP.
pub fn strlen(engine: &StorageEngine, db: i64, key: &[u8]) -> Result<i64> {
    engine.ensure_db(db)?;
    let conn = engine.read_pool().get()?;
    let now = now_ms();
    Ok(logical_value(&conn, db, key, now)?
        .map(|v| v.len() as i64)
        .unwrap_or(0))
}

/// MGET(keys...) — one roundtrip, reassembled into input order via a
/// `key -> value` map rather than trusting engine row order.
pub fn mget(engine: &StorageEngine, db: i64, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
    engine.ensure_db(db)?;
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let conn = engine.read_pool().get()?;
    let now = now_ms();
    let table = table_name(db);
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!(
        "SELECT key, value, type, exp FROM {} WHERE key IN ({})",
        table, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let bound: Vec<&dyn ToSql> = keys.iter().map(|k| k as &dyn ToSql).collect();
    let mut rows = stmt.query(bound.as_slice())?;

    let mut found: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let key: Vec<u8> = row.get(0)?;
        let value: Vec<u8> = row.get(1)?;
        let ty: String = row.get(2)?;
        let exp: Option<i64> = row.get(3)?;
        if ty != "s" {
            continue;
        }
        if let Some(e) = exp {
            if e < now {
                continue;
            }
        }
        found.insert(key, value);
    }

    Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
}

/// MSET(pairs...) — every pair upserted inside one WP transaction.
pub fn mset(engine: &StorageEngine, db: i64, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let now = now_ms();
    for (key, value) in pairs {
        upsert(tx.conn(), db, key, value, None, now)?;
    }
    tx.end()?;
    Ok(())
}

/// MSETNX(pairs...) — composes EXISTS over every key, then MSET, atomically.
pub fn msetnx(engine: &StorageEngine, db: i64, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<i64> {
    engine.ensure_db(db)?;
    let mut tx = Transaction::begin(engine.write_pool())?;
    let was = tx.chain();
    let now = now_ms();

    for (key, _) in pairs {
        if raw_presence(tx.conn(), db, key, now)? {
            if !was {
                tx.unchain();
            }
            tx.end()?;
            return Ok(0);
        }
    }
    for (key, value) in pairs {
        upsert(tx.conn(), db, key, value, None, now)?;
    }
    if !was {
        tx.unchain();
    }
    tx.end()?;
    Ok(1)
}

/// SETNX(key, value) — MSETNX with a single pair.
pub fn setnx(engine: &StorageEngine, db: i64, key: &[u8], value: &[u8]) -> Result<i64> {
    msetnx(engine, db, &[(key.to_vec(), value.to_vec())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_with_storage_path;

    fn engine() -> StorageEngine {
        StorageEngine::open(&config_with_storage_path(":memory:".into())).unwrap()
    }

    #[test]
    fn set_then_get_returns_value() {
        let e = engine();
        set(&e, 0, b"foo", b"bar", SetOptions::default()).unwrap();
        assert_eq!(get(&e, 0, b"foo").unwrap(), Some(b"bar".to_vec()));
    }

    #[test]
    fn second_set_overwrites_first() {
        let e = engine();
        set(&e, 0, b"foo", b"v1", SetOptions::default()).unwrap();
        set(&e, 0, b"foo", b"v2", SetOptions::default()).unwrap();
        assert_eq!(get(&e, 0, b"foo").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn del_then_exists_is_zero() {
        let e = engine();
        set(&e, 0, b"k", b"v", SetOptions::default()).unwrap();
        del(&e, 0, &[b"k".to_vec()]).unwrap();
        assert_eq!(exists(&e, 0, &[b"k".to_vec()]).unwrap(), 0);
    }

    #[test]
    fn del_counts_attempts_not_rows() {
        let e = engine();
        let n = del(&e, 0, &[b"missing".to_vec()]).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn expired_key_reads_as_nil() {
        let e = engine();
        let opts = SetOptions {
            expiration: Some(Expiration::Ex(-1)),
            ..Default::default()
        };
        set(&e, 0, b"foo", b"bar", opts).unwrap();
        assert_eq!(get(&e, 0, b"foo").unwrap(), None);
    }

    #[test]
    fn set_nx_on_existing_key_is_noop() {
        let e = engine();
        set(&e, 0, b"k", b"v1", SetOptions::default()).unwrap();
        let opts = SetOptions {
            existence: Some(Existence::Nx),
            ..Default::default()
        };
        let outcome = set(&e, 0, b"k", b"v2", opts).unwrap();
        assert!(matches!(outcome, SetOutcome::NoOp(_)));
        assert_eq!(get(&e, 0, b"k").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn set_xx_on_missing_key_is_noop() {
        let e = engine();
        let opts = SetOptions {
            existence: Some(Existence::Xx),
            ..Default::default()
        };
        let outcome = set(&e, 0, b"missing", b"v", opts).unwrap();
        assert!(matches!(outcome, SetOutcome::NoOp(_)));
        assert_eq!(get(&e, 0, b"missing").unwrap(), None);
    }

    #[test]
    fn set_keepttl_preserves_ttl() {
        let e = engine();
        let with_ttl = SetOptions {
            expiration: Some(Expiration::Ex(100)),
            ..Default::default()
        };
        set(&e, 0, b"k", b"v1", with_ttl).unwrap();

        let keep_ttl = SetOptions {
            expiration: Some(Expiration::KeepTtl),
            ..Default::default()
        };
        set(&e, 0, b"k", b"v2", keep_ttl).unwrap();

        assert_eq!(get(&e, 0, b"k").unwrap(), Some(b"v2".to_vec()));
        let conn = e.read_pool().get().unwrap();
        let exp: Option<i64> = conn
            .query_row("SELECT exp FROM bigdis_0 WHERE key = 'k'", [], |r| r.get(0))
            .unwrap();
        assert!(exp.is_some());
    }

    #[test]
    fn incrby_accumulates_and_decr_works() {
        let e = engine();
        set(&e, 0, b"n", b"10", SetOptions::default()).unwrap();
        assert_eq!(incrby(&e, 0, b"n", 5).unwrap(), 15);
        assert_eq!(decr(&e, 0, b"n").unwrap(), 14);
        assert_eq!(get(&e, 0, b"n").unwrap(), Some(b"14".to_vec()));
    }

    #[test]
    fn incrby_overflow_is_not_integer_error() {
        let e = engine();
        set(&e, 0, b"n", i64::MAX.to_string().as_bytes(), SetOptions::default()).unwrap();
        let err = incrby(&e, 0, b"n", 1).unwrap_err();
        assert!(matches!(err, Error::NotInteger));
    }

    #[test]
    fn incrby_on_non_numeric_value_errors() {
        let e = engine();
        set(&e, 0, b"n", b"not-a-number", SetOptions::default()).unwrap();
        let err = incrby(&e, 0, b"n", 1).unwrap_err();
        assert!(matches!(err, Error::NotInteger));
    }

    #[test]
    fn append_concatenates_and_returns_length() {
        let e = engine();
        set(&e, 0, b"k", b"hello", SetOptions::default()).unwrap();
        let n = append(&e, 0, b"k", b" world").unwrap();
        assert_eq!(n, 11);
        assert_eq!(get(&e, 0, b"k").unwrap(), Some(b"hello world".to_vec()));
        assert_eq!(strlen(&e, 0, b"k").unwrap(), 11);
    }

    #[test]
    fn mget_preserves_input_order_and_fills_nil() {
        let e = engine();
        mset(
            &e,
            0,
            &[
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ],
        )
        .unwrap();
        let res = mget(&e, 0, &[b"c".to_vec(), b"a".to_vec(), b"x".to_vec()]).unwrap();
        assert_eq!(
            res,
            vec![Some(b"3".to_vec()), Some(b"1".to_vec()), None]
        );
    }

    #[test]
    fn msetnx_is_all_or_nothing() {
        let e = engine();
        set(&e, 0, b"a", b"1", SetOptions::default()).unwrap();
        let r = msetnx(
            &e,
            0,
            &[(b"a".to_vec(), b"x".to_vec()), (b"b".to_vec(), b"y".to_vec())],
        )
        .unwrap();
        assert_eq!(r, 0);
        assert_eq!(get(&e, 0, b"b").unwrap(), None);
    }

    #[test]
    fn setnx_creates_when_absent() {
        let e = engine();
        assert_eq!(setnx(&e, 0, b"k", b"v").unwrap(), 1);
        assert_eq!(get(&e, 0, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn getset_returns_prior_and_writes_new() {
        let e = engine();
        set(&e, 0, b"k", b"old", SetOptions::default()).unwrap();
        let prior = getset(&e, 0, b"k", b"new").unwrap();
        assert_eq!(prior, Some(b"old".to_vec()));
        assert_eq!(get(&e, 0, b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn getdel_removes_key_and_returns_prior() {
        let e = engine();
        set(&e, 0, b"k", b"v", SetOptions::default()).unwrap();
        let prior = getdel(&e, 0, b"k").unwrap();
        assert_eq!(prior, Some(b"v".to_vec()));
        assert_eq!(get(&e, 0, b"k").unwrap(), None);
    }

    #[test]
    fn wrong_type_read_errors_without_modifying_row() {
        let e = engine();
        e.ensure_db(0).unwrap();
        {
            let conn = e.write_pool().get().unwrap();
            conn.execute(
                "INSERT INTO bigdis_0 (key, value, type) VALUES ('k', X'00', 'l')",
                [],
            )
            .unwrap();
        }
        let err = get(&e, 0, b"k").unwrap_err();
        assert!(matches!(err, Error::WrongType));

        let conn = e.read_pool().get().unwrap();
        let ty: String = conn
            .query_row("SELECT type FROM bigdis_0 WHERE key = 'k'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(ty, "l");
    }
}
