//! Error types for the sign-in gateway process

use std::io;

use thiserror::Error;

/// Result type alias for the sign-in gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors (startup, configuration, serving)
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
