//! Command Dispatcher (C5).
//!
//! Maps a RESP request's command name to a handler, validates arity, drives
//! the blocking storage primitives off the async runtime via
//! `spawn_blocking`, and renders one `Reply` per command.

use crate::error::{Error, Result};
use crate::protocol::Reply;
use crate::session::Session;
use crate::storage::set_options;
use crate::storage::strings::{self, SetOutcome};
use crate::storage::StorageEngine;
use std::sync::Arc;

const WELCOME_BANNER: &str = "Welcome to bigdis";

/// Runs a blocking storage closure on the blocking thread pool, flattening
/// a task-join failure into the same `Error` type the closure itself uses.
async fn block<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
    }
}

fn wrong_arity(cmd: &str) -> Error {
    Error::WrongArity(cmd.to_string())
}

fn parse_i64(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::NotInteger)
}

fn reply_or_error(result: Result<Reply>) -> Reply {
    match result {
        Ok(reply) => reply,
        Err(e) => Reply::from(&e),
    }
}

/// Dispatches one already-parsed request. Returns the reply to write and
/// whether the connection should close after writing it (`QUIT`).
pub async fn dispatch(engine: &Arc<StorageEngine>, session: &mut Session, request: Vec<Vec<u8>>) -> (Reply, bool) {
    let name = match request.first() {
        Some(bytes) => String::from_utf8_lossy(bytes).to_ascii_uppercase(),
        None => return (Reply::ok(), false),
    };
    let args = &request[1..];

    match name.as_str() {
        "QUIT" => (Reply::ok(), true),
        "PING" => (reply_or_error(handle_ping(args)), false),
        "COMMAND" => (Reply::Status(WELCOME_BANNER.to_string()), false),
        "CONFIG" => (Reply::nil(), false),
        "SELECT" => (reply_or_error(handle_select(engine, session, args).await), false),
        "GET" => (reply_or_error(handle_get(engine, session, args).await), false),
        "SET" => (reply_or_error(handle_set(engine, session, args).await), false),
        "GETSET" => (reply_or_error(handle_getset(engine, session, args).await), false),
        "GETDEL" => (reply_or_error(handle_getdel(engine, session, args).await), false),
        "DEL" => (reply_or_error(handle_del(engine, session, args).await), false),
        "EXISTS" => (reply_or_error(handle_exists(engine, session, args).await), false),
        "INCR" => (reply_or_error(handle_incrby(engine, session, args, IncrKind::Incr).await), false),
        "DECR" => (reply_or_error(handle_incrby(engine, session, args, IncrKind::Decr).await), false),
        "INCRBY" => (reply_or_error(handle_incrby(engine, session, args, IncrKind::IncrBy).await), false),
        "DECRBY" => (reply_or_error(handle_incrby(engine, session, args, IncrKind::DecrBy).await), false),
        "APPEND" => (reply_or_error(handle_append(engine, session, args).await), false),
        "STRLEN" => (reply_or_error(handle_strlen(engine, session, args).await), false),
        "MGET" => (reply_or_error(handle_mget(engine, session, args).await), false),
        "MSET" => (reply_or_error(handle_mset(engine, session, args).await), false),
        "MSETNX" => (reply_or_error(handle_msetnx(engine, session, args).await), false),
        "SETNX" => (reply_or_error(handle_setnx(engine, session, args).await), false),
        "FLUSHDB" => (reply_or_error(handle_flushdb(engine, session, args).await), false),
        "FLUSHALL" => (reply_or_error(handle_flushall(engine, args).await), false),
        _ => (Reply::Error(unknown_command(&name, args)), false),
    }
}

fn unknown_command(name: &str, args: &[Vec<u8>]) -> String {
    let quoted: Vec<String> = args
        .iter()
        .map(|a| format!("'{}'", String::from_utf8_lossy(a)))
        .collect();
    format!(
        "ERR unknown command '{}', with args beginning with: {}",
        name,
        quoted.join(" ")
    )
}

fn handle_ping(args: &[Vec<u8>]) -> Result<Reply> {
    if !args.is_empty() {
        return Err(wrong_arity("ping"));
    }
    Ok(Reply::Status("PONG".to_string()))
}

async fn handle_select(engine: &Arc<StorageEngine>, session: &mut Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 1 {
        return Err(wrong_arity("select"));
    }
    let db = parse_i64(&args[0])?;
    if db < 0 {
        return Err(Error::NotInteger);
    }
    let engine = Arc::clone(engine);
    block(move || engine.ensure_db(db)).await?;
    session.current_db = db;
    Ok(Reply::ok())
}

async fn handle_get(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 1 {
        return Err(wrong_arity("get"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let engine = Arc::clone(engine);
    let value = block(move || strings::get(&engine, db, &key)).await?;
    Ok(match value {
        Some(v) => Reply::bulk(v),
        None => Reply::nil(),
    })
}

async fn handle_set(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() < 2 {
        return Err(wrong_arity("set"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let value = args[1].clone();
    let opts = set_options::parse(&args[2..])?;
    let wants_get = opts.get;
    let engine = Arc::clone(engine);
    let outcome = block(move || strings::set(&engine, db, &key, &value, opts)).await?;
    Ok(match outcome {
        SetOutcome::Written(prior) => {
            if wants_get {
                match prior {
                    Some(v) => Reply::bulk(v),
                    None => Reply::nil(),
                }
            } else {
                Reply::ok()
            }
        }
        SetOutcome::NoOp(prior) => match prior {
            Some(v) => Reply::bulk(v),
            None => Reply::nil(),
        },
    })
}

async fn handle_getset(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 2 {
        return Err(wrong_arity("getset"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let value = args[1].clone();
    let engine = Arc::clone(engine);
    let prior = block(move || strings::getset(&engine, db, &key, &value)).await?;
    Ok(match prior {
        Some(v) => Reply::bulk(v),
        None => Reply::nil(),
    })
}

async fn handle_getdel(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 1 {
        return Err(wrong_arity("getdel"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let engine = Arc::clone(engine);
    let prior = block(move || strings::getdel(&engine, db, &key)).await?;
    Ok(match prior {
        Some(v) => Reply::bulk(v),
        None => Reply::nil(),
    })
}

async fn handle_del(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.is_empty() {
        return Err(wrong_arity("del"));
    }
    let db = session.current_db;
    let keys: Vec<Vec<u8>> = args.to_vec();
    let engine = Arc::clone(engine);
    let count = block(move || strings::del(&engine, db, &keys)).await?;
    Ok(Reply::Integer(count))
}

async fn handle_exists(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.is_empty() {
        return Err(wrong_arity("exists"));
    }
    let db = session.current_db;
    let keys: Vec<Vec<u8>> = args.to_vec();
    let engine = Arc::clone(engine);
    let count = block(move || strings::exists(&engine, db, &keys)).await?;
    Ok(Reply::Integer(count))
}

enum IncrKind {
    Incr,
    Decr,
    IncrBy,
    DecrBy,
}

async fn handle_incrby(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>], kind: IncrKind) -> Result<Reply> {
    let db = session.current_db;
    let engine = Arc::clone(engine);
    let result = match kind {
        IncrKind::Incr => {
            if args.len() != 1 {
                return Err(wrong_arity("incr"));
            }
            let key = args[0].clone();
            block(move || strings::incr(&engine, db, &key)).await?
        }
        IncrKind::Decr => {
            if args.len() != 1 {
                return Err(wrong_arity("decr"));
            }
            let key = args[0].clone();
            block(move || strings::decr(&engine, db, &key)).await?
        }
        IncrKind::IncrBy => {
            if args.len() != 2 {
                return Err(wrong_arity("incrby"));
            }
            let key = args[0].clone();
            let delta = parse_i64(&args[1])?;
            block(move || strings::incrby(&engine, db, &key, delta)).await?
        }
        IncrKind::DecrBy => {
            if args.len() != 2 {
                return Err(wrong_arity("decrby"));
            }
            let key = args[0].clone();
            let n = parse_i64(&args[1])?;
            block(move || strings::decrby(&engine, db, &key, n)).await?
        }
    };
    Ok(Reply::Integer(result))
}

async fn handle_append(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 2 {
        return Err(wrong_arity("append"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let suffix = args[1].clone();
    let engine = Arc::clone(engine);
    let len = block(move || strings::append(&engine, db, &key, &suffix)).await?;
    Ok(Reply::Integer(len))
}

async fn handle_strlen(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 1 {
        return Err(wrong_arity("strlen"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let engine = Arc::clone(engine);
    let len = block(move || strings::strlen(&engine, db, &key)).await?;
    Ok(Reply::Integer(len))
}

async fn handle_mget(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.is_empty() {
        return Err(wrong_arity("mget"));
    }
    let db = session.current_db;
    let keys: Vec<Vec<u8>> = args.to_vec();
    let engine = Arc::clone(engine);
    let values = block(move || strings::mget(&engine, db, &keys)).await?;
    Ok(Reply::Array(
        values
            .into_iter()
            .map(|v| match v {
                Some(bytes) => Reply::bulk(bytes),
                None => Reply::nil(),
            })
            .collect(),
    ))
}

fn pairs_from(args: &[Vec<u8>], cmd: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(wrong_arity(cmd));
    }
    Ok(args.chunks_exact(2).map(|c| (c[0].clone(), c[1].clone())).collect())
}

async fn handle_mset(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    let pairs = pairs_from(args, "mset")?;
    let db = session.current_db;
    let engine = Arc::clone(engine);
    block(move || strings::mset(&engine, db, &pairs)).await?;
    Ok(Reply::ok())
}

async fn handle_msetnx(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    let pairs = pairs_from(args, "msetnx")?;
    let db = session.current_db;
    let engine = Arc::clone(engine);
    let result = block(move || strings::msetnx(&engine, db, &pairs)).await?;
    Ok(Reply::Integer(result))
}

async fn handle_setnx(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    if args.len() != 2 {
        return Err(wrong_arity("setnx"));
    }
    let db = session.current_db;
    let key = args[0].clone();
    let value = args[1].clone();
    let engine = Arc::clone(engine);
    let result = block(move || strings::setnx(&engine, db, &key, &value)).await?;
    Ok(Reply::Integer(result))
}

/// Parses the optional trailing `SYNC`/`ASYNC` sub-argument shared by
/// FLUSHDB/FLUSHALL.
enum FlushMode {
    Sync,
    Async,
}

fn parse_flush_mode(args: &[Vec<u8>], cmd: &str) -> Result<FlushMode> {
    match args.len() {
        0 => Ok(FlushMode::Sync),
        1 => {
            let word = std::str::from_utf8(&args[0])
                .map_err(|_| Error::WrongSyntax)?
                .to_ascii_uppercase();
            match word.as_str() {
                "SYNC" => Ok(FlushMode::Sync),
                "ASYNC" => Ok(FlushMode::Async),
                _ => Err(Error::WrongSyntax),
            }
        }
        _ => Err(wrong_arity(cmd)),
    }
}

async fn handle_flushdb(engine: &Arc<StorageEngine>, session: &Session, args: &[Vec<u8>]) -> Result<Reply> {
    let mode = parse_flush_mode(args, "flushdb")?;
    let db = session.current_db;
    match mode {
        FlushMode::Sync => {
            let engine = Arc::clone(engine);
            block(move || engine.flushdb(db)).await?;
        }
        FlushMode::Async => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                if let Err(e) = block(move || engine.flushdb(db)).await {
                    log::warn!("background FLUSHDB failed: {}", e);
                }
            });
        }
    }
    Ok(Reply::ok())
}

async fn handle_flushall(engine: &Arc<StorageEngine>, args: &[Vec<u8>]) -> Result<Reply> {
    let mode = parse_flush_mode(args, "flushall")?;
    match mode {
        FlushMode::Sync => {
            let engine = Arc::clone(engine);
            block(move || engine.flushall()).await?;
        }
        FlushMode::Async => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                if let Err(e) = block(move || engine.flushall()).await {
                    log::warn!("background FLUSHALL failed: {}", e);
                }
            });
        }
    }
    Ok(Reply::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_with_storage_path;

    fn test_engine() -> Arc<StorageEngine> {
        Arc::new(StorageEngine::open(&config_with_storage_path(":memory:".into())).unwrap())
    }

    fn req(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let engine = test_engine();
        let mut session = Session::new();
        let (reply, close) = dispatch(&engine, &mut session, req(&["PING"])).await;
        assert_eq!(reply, Reply::Status("PONG".to_string()));
        assert!(!close);
    }

    #[tokio::test]
    async fn quit_closes_connection() {
        let engine = test_engine();
        let mut session = Session::new();
        let (reply, close) = dispatch(&engine, &mut session, req(&["QUIT"])).await;
        assert_eq!(reply, Reply::ok());
        assert!(close);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let engine = test_engine();
        let mut session = Session::new();
        let (reply, _) = dispatch(&engine, &mut session, req(&["SET", "foo", "bar"])).await;
        assert_eq!(reply, Reply::ok());
        let (reply, _) = dispatch(&engine, &mut session, req(&["GET", "foo"])).await;
        assert_eq!(reply, Reply::bulk(b"bar".to_vec()));
    }

    #[tokio::test]
    async fn select_changes_session_db() {
        let engine = test_engine();
        let mut session = Session::new();
        dispatch(&engine, &mut session, req(&["SELECT", "2"])).await;
        assert_eq!(session.current_db, 2);
        dispatch(&engine, &mut session, req(&["SET", "k", "inDb2"])).await;
        dispatch(&engine, &mut session, req(&["SELECT", "0"])).await;
        let (reply, _) = dispatch(&engine, &mut session, req(&["GET", "k"])).await;
        assert_eq!(reply, Reply::nil());
    }

    #[tokio::test]
    async fn wrong_arity_is_reported_without_closing() {
        let engine = test_engine();
        let mut session = Session::new();
        let (reply, close) = dispatch(&engine, &mut session, req(&["GET"])).await;
        assert_eq!(
            reply,
            Reply::Error("ERR wrong number of arguments for 'get' command".to_string())
        );
        assert!(!close);
    }

    #[tokio::test]
    async fn unknown_command_echoes_name_and_args() {
        let engine = test_engine();
        let mut session = Session::new();
        let (reply, _) = dispatch(&engine, &mut session, req(&["FROBNICATE", "a", "b"])).await;
        assert_eq!(
            reply,
            Reply::Error("ERR unknown command 'FROBNICATE', with args beginning with: 'a' 'b'".to_string())
        );
    }

    #[tokio::test]
    async fn flushdb_sync_clears_current_db() {
        let engine = test_engine();
        let mut session = Session::new();
        dispatch(&engine, &mut session, req(&["SET", "k", "v"])).await;
        dispatch(&engine, &mut session, req(&["FLUSHDB"])).await;
        let (reply, _) = dispatch(&engine, &mut session, req(&["EXISTS", "k"])).await;
        assert_eq!(reply, Reply::Integer(0));
    }
}
