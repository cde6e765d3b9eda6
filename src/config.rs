//! Configuration loading.
//!
//! Parses JSON into a raw struct, then sanitizes in a second pass rather
//! than failing on an unrecognized enum value. A configuration file is
//! selected by `--config`; an empty path falls back to the defaults
//! embedded at compile time.

use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_JSON: &str = include_str!("default.json");

const JOURNAL_MODES: &[&str] = &["wal", "delete", "truncate", "persist", "memory", "off"];
const SYNCHRONOUS_MODES: &[&str] = &["off", "normal", "full", "extra"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawServer {
    host: String,
    port: u16,
    systemd_watchdog: bool,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            systemd_watchdog: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawStorage {
    path: String,
    journal_mode: String,
    synchronous: String,
    gc_interval: i64,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            path: String::new(),
            journal_mode: String::new(),
            synchronous: String::new(),
            gc_interval: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    server: RawServer,
    storage: RawStorage,
}

/// Fully sanitized server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub systemd_watchdog: bool,
    pub storage_path: String,
    pub journal_mode: String,
    pub synchronous: String,
    /// Reserved: read from config but not acted on.
    pub gc_interval: i64,
}

impl Config {
    /// Load configuration from `config_path`, or the embedded defaults if
    /// the path is empty. Any I/O or JSON error is fatal: a bad config file
    /// should stop startup, not fall back silently.
    pub fn load(config_path: Option<&Path>) -> std::io::Result<Self> {
        let content = match config_path {
            Some(path) if !path.as_os_str().is_empty() => std::fs::read_to_string(path)?,
            _ => DEFAULT_CONFIG_JSON.to_string(),
        };

        let raw: RawConfig = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        Ok(Self::sanitize(raw))
    }

    fn sanitize(raw: RawConfig) -> Self {
        let host = if raw.server.host.is_empty() {
            "localhost".to_string()
        } else {
            raw.server.host
        };
        let port = if raw.server.port == 0 {
            6389
        } else {
            raw.server.port
        };
        let storage_path = if raw.storage.path.is_empty() {
            "bigdis.db".to_string()
        } else {
            raw.storage.path
        };
        let journal_mode = if JOURNAL_MODES.contains(&raw.storage.journal_mode.as_str()) {
            raw.storage.journal_mode
        } else {
            "wal".to_string()
        };
        let synchronous = if SYNCHRONOUS_MODES.contains(&raw.storage.synchronous.as_str()) {
            raw.storage.synchronous
        } else {
            "normal".to_string()
        };

        Config {
            host,
            port,
            systemd_watchdog: raw.server.systemd_watchdog,
            storage_path,
            journal_mode,
            synchronous,
            gc_interval: raw.storage.gc_interval,
        }
    }

    /// A `ToSocketAddrs`-compatible pair, resolved by the caller at bind
    /// time rather than pre-parsed here: `host` may be a hostname like
    /// `localhost` (spec.md §6's own default), which `SocketAddr`'s
    /// `FromStr` rejects outright since it only accepts a numeric IP.
    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::sanitize(RawConfig::default())
    }
}

/// For tests that want a scratch on-disk path instead of the embedded
/// default's `bigdis.db`.
#[allow(dead_code)]
pub fn config_with_storage_path(path: PathBuf) -> Config {
    let mut cfg = Config::default();
    cfg.storage_path = path.to_string_lossy().into_owned();
    cfg
}
