//! End-to-end RESP wire tests: bind port 0 to discover a free port, spawn
//! `Server::run`, connect a real `TcpStream`, and assert on the exact wire
//! bytes of each reply.

use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use bigdis_rs::{Config, Server};

fn encode_request(parts: &[&str]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        buf.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        buf.extend_from_slice(part.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

async fn read_exact_len(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.expect("connection closed early");
    buf
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn connect_to(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not become ready in time");
}

async fn roundtrip(stream: &mut TcpStream, parts: &[&str], expect: &[u8]) {
    stream.write_all(&encode_request(parts)).await.unwrap();
    let got = read_exact_len(stream, expect.len()).await;
    assert_eq!(got, expect, "reply to {:?}", parts);
}

#[tokio::test]
async fn resp_scenarios_from_spec() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage_path = tmp.path().join("bigdis.db").to_string_lossy().into_owned();
    let port = free_port();
    config.port = port;
    config.host = "127.0.0.1".to_string();

    let server = Server::new(config).expect("failed to initialize server");
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut conn = connect_to(port).await;

    roundtrip(&mut conn, &["SET", "foo", "bar"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["GET", "foo"], b"$3\r\nbar\r\n").await;
    roundtrip(&mut conn, &["STRLEN", "foo"], b":3\r\n").await;

    roundtrip(&mut conn, &["SET", "n", "10"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["INCRBY", "n", "5"], b":15\r\n").await;
    roundtrip(&mut conn, &["DECR", "n"], b":14\r\n").await;
    roundtrip(&mut conn, &["GET", "n"], b"$2\r\n14\r\n").await;

    roundtrip(&mut conn, &["SET", "k", "hello"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["APPEND", "k", " world"], b":11\r\n").await;
    roundtrip(&mut conn, &["GET", "k"], b"$11\r\nhello world\r\n").await;

    roundtrip(&mut conn, &["MSET", "a", "1", "b", "2", "c", "3"], b"+OK\r\n").await;
    roundtrip(
        &mut conn,
        &["MGET", "a", "x", "c"],
        b"*3\r\n$1\r\n1\r\n$-1\r\n$1\r\n3\r\n",
    )
    .await;

    roundtrip(&mut conn, &["SET", "nx", "v", "NX"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["SET", "nx", "v2", "NX"], b"$-1\r\n").await;
    roundtrip(&mut conn, &["GET", "nx"], b"$1\r\nv\r\n").await;

    roundtrip(&mut conn, &["SELECT", "2"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["SET", "k", "inDb2"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["SELECT", "0"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["GET", "k"], b"$11\r\nhello world\r\n").await;

    roundtrip(&mut conn, &["FLUSHDB"], b"+OK\r\n").await;
    roundtrip(&mut conn, &["EXISTS", "foo"], b":0\r\n").await;

    roundtrip(&mut conn, &["PING"], b"+PONG\r\n").await;
    roundtrip(
        &mut conn,
        &["FROBNICATE", "x"],
        b"-ERR unknown command 'FROBNICATE', with args beginning with: 'x'\r\n",
    )
    .await;

    roundtrip(&mut conn, &["QUIT"], b"+OK\r\n").await;

    handle.abort();
}

#[tokio::test]
async fn state_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("bigdis.db").to_string_lossy().into_owned();

    {
        let mut config = Config::default();
        config.storage_path = db_path.clone();
        let port = free_port();
        config.port = port;
        config.host = "127.0.0.1".to_string();

        let server = Server::new(config).expect("failed to initialize server");
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        let mut conn = connect_to(port).await;
        roundtrip(&mut conn, &["SET", "durable", "value"], b"+OK\r\n").await;
        handle.abort();
    }

    {
        let mut config = Config::default();
        config.storage_path = db_path;
        let port = free_port();
        config.port = port;
        config.host = "127.0.0.1".to_string();

        let server = Server::new(config).expect("failed to reopen storage after restart");
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        let mut conn = connect_to(port).await;
        roundtrip(&mut conn, &["GET", "durable"], b"$5\r\nvalue\r\n").await;
        handle.abort();
    }
}
