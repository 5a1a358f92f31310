use folio_ledger::LedgerError;
use folio_protocol::ErrorData;
use folio_schema::SchemaError;
use folio_types::ObjectId;
use folio_worker::WorkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl SdkError {
    /// The engine's structured error, when the failure came from a sync
    /// operation.
    pub fn engine_error(&self) -> Option<&ErrorData> {
        match self {
            Self::Worker(WorkerError::Engine(data)) => Some(data),
            _ => None,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
