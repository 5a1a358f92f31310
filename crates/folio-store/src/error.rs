use folio_crypto::HasherError;
use folio_git::GitError;
use folio_schema::SchemaError;
use thiserror::Error;

/// Errors from the object file codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported value for {field}: {reason}")]
    Unsupported { field: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Errors from loading the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// One object file could not be parsed. The whole refresh fails.
    #[error("cannot parse {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: CodecError,
    },

    #[error("type definitions: {0}")]
    Schema(#[from] SchemaError),

    #[error("repository: {0}")]
    Git(#[from] GitError),

    #[error("hashing: {0}")]
    Hash(#[from] HasherError),
}

impl StoreError {
    /// The file location the error is about, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Parse { location, .. } => Some(location),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
