//! Error types for the TripUp sync core.

use thiserror::Error;

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for TripUp operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Asset not found in the database or cache
    #[error("Asset not found: {0}")]
    AssetNotFound(uuid::Uuid),

    /// Key material missing, corrupt, or unusable
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Cloud blob storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// REST API rejected or failed a request
    #[error("API error: {0}")]
    Api(String),

    /// Device photo library failed or returned nothing
    #[error("Photo library error: {0}")]
    PhotoLibrary(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
