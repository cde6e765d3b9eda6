use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use config::Config;

use crate::server::ConnectionHandler;
use crate::storage::StorageEngine;

/// The RESP-over-embedded-SQL server.
pub struct Server {
    config: Config,
    engine: Arc<StorageEngine>,
}

impl Server {
    /// Opens the storage engine and binds nothing yet; `run` does the
    /// listening. Any bootstrap failure here is fatal.
    pub fn new(config: Config) -> error::Result<Self> {
        let engine = Arc::new(StorageEngine::open(&config)?);
        Ok(Self { config, engine })
    }

    /// Runs the accept loop, spawning one task per connection, until the
    /// listener itself fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind((addr.0.as_str(), addr.1)).await?;
        info!("bigdis listening on {}:{}", addr.0, addr.1);
        info!("storage path: {}", self.config.storage_path);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("new connection from {}", peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        error!("failed to set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let engine = Arc::clone(&self.engine);
                    tokio::spawn(async move {
                        let handler = ConnectionHandler::new(stream, engine);
                        if let Err(e) = handler.run().await {
                            error!("connection error from {}: {}", peer, e);
                        }
                        info!("connection closed: {}", peer);
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}
