//! bigdis - a persistent key/value server speaking the RESP protocol,
//! backed by an embedded SQL engine.
//!
//! Architecture:
//!
//! ```text
//!   RESP client
//!        |
//!   ConnectionHandler (server.rs) -- one tokio task per TCP connection
//!        |
//!   Command Dispatcher (dispatcher.rs) -- arity checks, reply rendering
//!        |
//!   String Command Layer (storage/strings.rs)
//!        |
//!   Transaction Controller (storage/txn.rs) -- chain/unchain/end over WP or RP
//!        |
//!   Storage Engine Handle (storage/mod.rs) -- embedded SQL file
//! ```

use bigdis_rs::{Config, Server};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bigdis", about = "A RESP key/value server backed by an embedded SQL engine")]
struct Cli {
    /// Path to a JSON configuration file. Omit to use the embedded defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::new(config.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to initialize storage engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("starting bigdis");
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);

    let watchdog_handle = if config.systemd_watchdog {
        Some(tokio::spawn(watchdog_loop()))
    } else {
        None
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server loop exited with error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    if let Some(handle) = watchdog_handle {
        handle.abort();
    }
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);
    ExitCode::SUCCESS
}

async fn watchdog_loop() {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        interval.tick().await;
        let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]);
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
