//! Error types for the admission gate.

use thiserror::Error;

use crate::ratelimit::RateLimitExceeded;

/// Main error type for gate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Invalid configuration, detected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while layering configuration sources
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A request was rejected by a limiter
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
