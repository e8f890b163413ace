//! Error types for clipsync-server.

use std::path::PathBuf;

/// Main error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors, covering both the item store and the blob store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to an item.
    #[error("corrupt item row: {0}")]
    CorruptRow(String),

    /// Blob store I/O error.
    #[error("blob store error for {reference:?}: {source}")]
    Blob {
        /// The blob reference involved.
        reference: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configured upload directory is unusable.
    #[error("invalid upload directory: {path}")]
    InvalidUploadDir {
        /// The offending path.
        path: PathBuf,
    },
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
