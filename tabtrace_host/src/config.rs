//! Host configuration loaded from environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tabtrace_common::constants::{
    ANALYTICS_FRESHNESS_MS, CAPTURE_MODE_TTL_MS, DEFAULT_PORT, MAX_STORED_SESSIONS,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port for the HTTP/WebSocket surface
    pub port: u16,

    /// JSON file backing persistent state
    pub store_path: PathBuf,

    /// Keep state in memory only
    pub ephemeral: bool,

    /// How long the capture-mode flag is trusted before re-reading it
    pub capture_mode_ttl: Duration,

    /// Oldest analytics cache entry still served when loading fails (milliseconds)
    pub analytics_freshness_ms: i64,

    /// Bound on the historical session log
    pub max_stored_sessions: usize,

    /// Timeout for replay/modify/build requests
    pub action_timeout: Duration,
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        _ => Ok(default),
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabtrace")
        .join("store.json")
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_var("PORT", DEFAULT_PORT).map_err(|_| ConfigError::InvalidPort)?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            store_path: env::var("TABTRACE_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_store_path()),
            ephemeral: parse_var("TABTRACE_EPHEMERAL", false)?,
            capture_mode_ttl: Duration::from_millis(parse_var(
                "CAPTURE_MODE_TTL_MS",
                CAPTURE_MODE_TTL_MS,
            )?),
            analytics_freshness_ms: parse_var("ANALYTICS_FRESHNESS_MS", ANALYTICS_FRESHNESS_MS)?,
            max_stored_sessions: parse_var("MAX_STORED_SESSIONS", MAX_STORED_SESSIONS)?,
            action_timeout: Duration::from_secs(parse_var("ACTION_TIMEOUT_SECS", 30u64)?),
        })
    }

    /// Address to bind, e.g. "127.0.0.1:7420"
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
