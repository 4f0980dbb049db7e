//! Error types for the Quota Gate service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Quota Gate operations.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while assembling layered configuration sources
    #[error("Configuration source error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Counting store errors not tied to a specific client library
    #[error("Store error: {0}")]
    Store(String),

    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A store call did not complete within its deadline
    #[error("Store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quota Gate operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
