//! Error types for clipsync-types.

use thiserror::Error;

/// Errors that can occur when working with clipsync wire types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// An item violates the model invariant
    #[error("invalid item: {0}")]
    InvalidItem(String),
}
