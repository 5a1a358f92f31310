//! Worker transport for folio.
//!
//! The sync engine runs behind a [`Worker`] that owns it outright; the
//! editing side talks to it only through encoded frames on two
//! `tokio::sync::mpsc` channels, via a [`WorkerClient`]. [`spawn`] wires the
//! two together on the current runtime.

pub mod client;
pub mod error;
pub mod runtime;

pub use client::{into_result, PendingRequest, WorkerClient};
pub use error::{WorkerError, WorkerResult};
pub use runtime::{spawn, FrameReceiver, FrameSender, Worker};
