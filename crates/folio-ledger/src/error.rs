use folio_schema::SchemaError;
use folio_types::{ObjectId, TypeError};
use thiserror::Error;

/// The ledger cannot be replayed safely over the store.
///
/// Raised by materialization. The ledger that produced it has already been
/// reset by the time the caller sees it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("object {object_id} recorded as both {expected} and {found}")]
    TypeMismatch {
        object_id: ObjectId,
        expected: String,
        found: String,
    },

    #[error("object {object_id} has unknown type {object_type}")]
    UnknownType {
        object_id: ObjectId,
        object_type: String,
    },

    #[error("change to {object_id} does not fit its type: {source}")]
    InvalidChange {
        object_id: ObjectId,
        #[source]
        source: SchemaError,
    },
}

impl ConsistencyError {
    pub fn object_id(&self) -> ObjectId {
        match self {
            Self::TypeMismatch { object_id, .. }
            | Self::UnknownType { object_id, .. }
            | Self::InvalidChange { object_id, .. } => *object_id,
        }
    }
}

/// Errors from ledger operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Edits are refused while a sync is replaying the ledger.
    #[error("a sync is in progress")]
    SyncInProgress,

    #[error(transparent)]
    Malformed(#[from] TypeError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("state store: {0}")]
    State(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
