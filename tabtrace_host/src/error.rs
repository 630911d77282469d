//! Error types for the capture host

use thiserror::Error;

/// Failures of the key/value substrate or of (de)serializing what it holds
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store rejected operation: {0}")]
    Store(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Settings the user tried to save that fail validation
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("History size must be between 1 and {max}, got {value}")]
    HistorySizeOutOfRange { value: usize, max: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of a user-triggered replay, modify or build action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("URL is required")]
    MissingUrl,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),
    #[error("Headers must be a JSON object of strings: {0}")]
    InvalidHeaders(String),
    #[error("Call not found: {0}")]
    CallNotFound(String),
    #[error("Preset not found: {0}")]
    PresetNotFound(String),
    #[error("No active session for tab {0}")]
    NoSession(i64),
    #[error("Request failed: {0}")]
    Network(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
