use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid change key {key:?}: {reason}")]
    InvalidChangeKey { key: String, reason: String },

    #[error("malformed change: {0}")]
    MalformedChange(String),

    #[error("malformed deletion: {0}")]
    MalformedDeletion(String),

    #[error("invalid author: {0}")]
    InvalidAuthor(String),
}
