//! Error types for Floodgate.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid policy or limiter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend failures
    #[error("Store error: {0}")]
    Store(String),

    /// Malformed replay input
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Background task lifecycle errors
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Layered configuration loading errors
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
