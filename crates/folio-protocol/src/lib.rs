//! Worker transport protocol for folio.
//!
//! The editing side and the sync engine exchange [`WorkerMessage`]s: a
//! correlation id plus an [`Operation`] with its payload, as JSON inside a
//! length-prefixed frame ([`FrameCodec`]). Engine errors cross as
//! [`ErrorData`], never as bare strings.

pub mod codec;
pub mod error;
pub mod message;
pub mod payload;

pub use codec::FrameCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{CorrelationId, Operation, WorkerMessage, MAX_FRAME_SIZE};
pub use payload::{
    CloneRequest, ConfirmData, ErrorData, ErrorKind, LookupCommitsRequest, RetryPushRequest,
    SyncRequest,
};
