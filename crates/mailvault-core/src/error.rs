//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error while reading or writing a payload file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A live history entry references a payload file that no longer
    /// exists on disk. This indicates external tampering or corruption,
    /// never a normal outcome.
    #[error("Payload file missing for blob {0}")]
    BlobMissing(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
