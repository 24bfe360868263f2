//! Error types for the relay

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the relay
///
/// Only startup failures are fatal. Everything that can go wrong while
/// handling a single event is reported as an outcome value instead
/// (see `relay::EventOutcome` and `delivery::DeliveryFailure`).
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Extraction errors
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

// Conversion from rusqlite errors
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
