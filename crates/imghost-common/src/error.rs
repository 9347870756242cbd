//! Error types shared across imghost crates

use thiserror::Error;

/// Result type alias for imghost operations
pub type Result<T> = std::result::Result<T, ImghostError>;

/// Errors raised by shared helpers (option parsing, wire types)
#[derive(Error, Debug)]
pub enum ImghostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid output format: {0}")]
    InvalidOutputFormat(String),

    #[error("Invalid orientation: {0}")]
    InvalidOrientation(String),

    #[error("Invalid upload options: {0}")]
    InvalidOptions(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
