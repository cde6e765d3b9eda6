//! Per-connection handler: owns the socket, the `Session`, and the request/
//! reply loop. One task per accepted connection, reading requests until EOF
//! or a fatal framing error.

use crate::dispatcher;
use crate::protocol::{parser, write_reply, Reply};
use crate::session::Session;
use crate::storage::StorageEngine;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct ConnectionHandler {
    stream: TcpStream,
    engine: Arc<StorageEngine>,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, engine: Arc<StorageEngine>) -> Self {
        Self { stream, engine }
    }

    /// Drives the connection until the client disconnects, issues `QUIT`,
    /// or sends a malformed frame. A malformed frame is fatal to this
    /// connection only.
    pub async fn run(self) -> std::io::Result<()> {
        let (read_half, mut write_half) = self.stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut session = Session::new();

        loop {
            let request = match parser::read_request(&mut reader).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let reply = Reply::from(&e);
                    write_reply(&mut write_half, &reply).await?;
                    return Ok(());
                }
            };

            if request.is_empty() {
                continue;
            }

            let (reply, should_close) = dispatcher::dispatch(&self.engine, &mut session, request).await;
            write_reply(&mut write_half, &reply).await?;
            write_half.flush().await?;

            if should_close {
                return Ok(());
            }
        }
    }
}
