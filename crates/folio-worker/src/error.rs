use folio_protocol::{CorrelationId, ErrorData, ProtocolError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// A request with this id is still waiting for its response.
    #[error("correlation id {0} is already outstanding")]
    DuplicateCorrelation(CorrelationId),

    #[error("worker channel closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The engine answered with a structured error.
    #[error("{0}")]
    Engine(ErrorData),

    #[error("unexpected {0} response")]
    UnexpectedResponse(&'static str),
}

impl WorkerError {
    /// The structured form of this error, as the engine would report it.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::Engine(data) => data.clone(),
            Self::Protocol(e) => e.clone().into(),
            other => ErrorData::new(folio_protocol::ErrorKind::Protocol, other.to_string()),
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
