//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// A rejected request is not an error: it is reported through
/// [`Decision::Reject`](crate::ratelimit::Decision::Reject).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// The counter store could not be reached, read or written
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// Rate limit thresholds are missing or not positive
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),

    /// Service configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
