//! Error types shared by the Lampi tasks

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, LampiError>;

/// Errors raised while reading configuration and setting up the process
#[derive(Error, Debug)]
pub enum LampiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing env variable {0}")]
    MissingEnv(String),

    #[error("Invalid value for env variable {name}: {value:?}")]
    InvalidEnv { name: String, value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
