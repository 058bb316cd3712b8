//! Error types for the relay.

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay services.
#[derive(Error, Debug)]
pub enum Error {
    /// Provider client could not be built from configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Webhook body could not be decoded
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Config(_) => 500,
        }
    }
}
