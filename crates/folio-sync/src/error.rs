use std::collections::BTreeMap;
use std::fmt;

use folio_git::GitError;
use folio_store::StoreError;
use folio_types::ObjectId;
use thiserror::Error;

use crate::progress::SyncPhase;

/// Errors surfaced by the sync engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    /// The remote branch has diverged from the local one.
    #[error("not a fast-forward: {0}")]
    NonFastForward(String),

    /// A pending edit targets an object that no longer exists remotely.
    #[error("object {0} no longer exists")]
    MissingObject(ObjectId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("filesystem error at {path}: {reason}")]
    Filesystem { path: String, reason: String },

    #[error("cannot parse {location}: {reason}")]
    Parse { location: String, reason: String },

    #[error("type definitions: {0}")]
    Schema(String),

    #[error("a sync is already in progress")]
    SyncInProgress,

    #[error("no unpushed commit")]
    NothingToPush,

    #[error("repository has not been cloned")]
    NotCloned,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),
}

impl SyncError {
    pub fn validation(reason: impl fmt::Display) -> Self {
        Self::Validation(reason.to_string())
    }

    /// Attach the phase the error happened in.
    pub fn during(self, phase: SyncPhase) -> SyncFailure {
        SyncFailure {
            phase: Some(phase),
            committed: false,
            renamed: BTreeMap::new(),
            error: self,
        }
    }
}

impl From<GitError> for SyncError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Auth(url) => Self::Auth(url),
            GitError::Network(reason) => Self::Network(reason),
            GitError::NonFastForward(reason) => Self::NonFastForward(reason),
            GitError::Filesystem { path, reason } => Self::Filesystem { path, reason },
            GitError::NotInitialized => Self::NotCloned,
            other @ (GitError::NotFound(_) | GitError::Other(_)) => Self::Git(other.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Parse { location, source } => Self::Parse {
                location,
                reason: source.to_string(),
            },
            StoreError::Schema(e) => Self::Schema(e.to_string()),
            StoreError::Git(e) => e.into(),
            StoreError::Hash(e) => Self::Validation(e.to_string()),
        }
    }
}

/// A failed engine operation: the error, the phase it aborted, and whether
/// a commit was already made locally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct SyncFailure {
    pub phase: Option<SyncPhase>,
    /// `true` when the failure came after the local commit, which stays.
    pub committed: bool,
    /// For a kept commit, ledger ids whose object the commit gave a new id.
    pub renamed: BTreeMap<ObjectId, ObjectId>,
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    /// Mark the failure as coming after a successful local commit.
    pub fn after_commit(mut self) -> Self {
        self.committed = true;
        self
    }

    pub fn with_renamed(mut self, renamed: BTreeMap<ObjectId, ObjectId>) -> Self {
        self.renamed = renamed;
        self
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Some(phase) => write!(f, "{phase}: {}", self.error)?,
            None => write!(f, "{}", self.error)?,
        }
        if self.committed {
            f.write_str(" (changes committed locally)")?;
        }
        Ok(())
    }
}

impl From<SyncError> for SyncFailure {
    fn from(error: SyncError) -> Self {
        Self {
            phase: None,
            committed: false,
            renamed: BTreeMap::new(),
            error,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
