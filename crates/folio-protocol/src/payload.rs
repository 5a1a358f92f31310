use std::collections::BTreeMap;
use std::fmt;

use folio_ledger::{ConsistencyError, LedgerError, LedgerSnapshot};
use folio_sync::{SyncError, SyncFailure, SyncPhase};
use folio_types::{Author, Change, Deletion, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProtocolError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    pub url: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub changes: Vec<Change>,
    pub deletions: Vec<Deletion>,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SyncRequest {
    pub fn new(snapshot: LedgerSnapshot, author: Author, token: Option<String>) -> Self {
        Self {
            changes: snapshot.changes,
            deletions: snapshot.deletions,
            author,
            token,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            changes: self.changes.clone(),
            deletions: self.deletions.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPushRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupCommitsRequest {
    pub shas: Vec<String>,
}

/// Acknowledges a completed request. `commit` is set when the request
/// produced or pushed a commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Ledger ids whose object the sync gave a new content id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renamed: BTreeMap<ObjectId, ObjectId>,
}

/// Error classes that cross the worker boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    Network,
    NonFastForward,
    MissingObject,
    Validation,
    Filesystem,
    Parse,
    Schema,
    Consistency,
    SyncInProgress,
    NothingToPush,
    NotCloned,
    Config,
    Protocol,
    Git,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A structured error as delivered to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SyncPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub committed: bool,
    /// Set with `committed`: ids the kept commit changed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renamed: BTreeMap<ObjectId, ObjectId>,
}

impl ErrorData {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase: None,
            object_id: None,
            location: None,
            committed: false,
            renamed: BTreeMap::new(),
        }
    }

    pub fn sync_in_progress() -> Self {
        SyncError::SyncInProgress.into()
    }
}

impl From<SyncError> for ErrorData {
    fn from(e: SyncError) -> Self {
        let message = e.to_string();
        let (kind, object_id, location) = match e {
            SyncError::Auth(_) => (ErrorKind::Auth, None, None),
            SyncError::Network(_) => (ErrorKind::Network, None, None),
            SyncError::NonFastForward(_) => (ErrorKind::NonFastForward, None, None),
            SyncError::MissingObject(id) => (ErrorKind::MissingObject, Some(id), None),
            SyncError::Validation(_) => (ErrorKind::Validation, None, None),
            SyncError::Filesystem { path, .. } => (ErrorKind::Filesystem, None, Some(path)),
            SyncError::Parse { location, .. } => (ErrorKind::Parse, None, Some(location)),
            SyncError::Schema(_) => (ErrorKind::Schema, None, None),
            SyncError::SyncInProgress => (ErrorKind::SyncInProgress, None, None),
            SyncError::NothingToPush => (ErrorKind::NothingToPush, None, None),
            SyncError::NotCloned => (ErrorKind::NotCloned, None, None),
            SyncError::Config(_) => (ErrorKind::Config, None, None),
            SyncError::Git(_) => (ErrorKind::Git, None, None),
        };
        Self {
            object_id,
            location,
            ..Self::new(kind, message)
        }
    }
}

impl From<SyncFailure> for ErrorData {
    fn from(failure: SyncFailure) -> Self {
        Self {
            phase: failure.phase,
            committed: failure.committed,
            renamed: failure.renamed,
            ..failure.error.into()
        }
    }
}

impl From<ConsistencyError> for ErrorData {
    fn from(e: ConsistencyError) -> Self {
        Self {
            object_id: Some(e.object_id()),
            ..Self::new(ErrorKind::Consistency, e.to_string())
        }
    }
}

impl From<LedgerError> for ErrorData {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::SyncInProgress => Self::sync_in_progress(),
            LedgerError::Malformed(e) => Self::new(ErrorKind::Validation, e.to_string()),
            LedgerError::Consistency(e) => e.into(),
            LedgerError::State(reason) => Self::new(ErrorKind::Internal, reason),
        }
    }
}

impl From<ProtocolError> for ErrorData {
    fn from(e: ProtocolError) -> Self {
        Self::new(ErrorKind::Protocol, e.to_string())
    }
}
