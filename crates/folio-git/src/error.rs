use thiserror::Error;

/// Errors from git primitives.
///
/// The variants mirror the classes the sync engine needs to tell apart;
/// anything else lands in `Other`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GitError {
    #[error("authentication failed for {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not a fast-forward: {0}")]
    NonFastForward(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("filesystem error at {path}: {reason}")]
    Filesystem { path: String, reason: String },

    #[error("repository has not been cloned")]
    NotInitialized,

    #[error("git error: {0}")]
    Other(String),
}

impl GitError {
    pub fn filesystem(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Filesystem {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type GitResult<T> = Result<T, GitError>;
