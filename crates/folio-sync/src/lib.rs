//! Sync engine for folio.
//!
//! A [`SyncEngine`] owns one working tree and its object store. A sync runs
//! strictly in order:
//!
//! 1. pull (fast-forward only) and refresh the store from the pulled tree
//! 2. replay the shipped ledger over the fresh store, rehashing every
//!    touched object
//! 3. write and stage the result, all-or-nothing
//! 4. commit, push, and refresh again
//!
//! Every failure is a [`SyncFailure`] naming the phase it aborted and
//! whether a local commit was already made. Progress goes to a
//! [`ProgressObserver`] as `(phase, fraction)` pairs.

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod replay;

pub use config::{EngineConfig, COMMIT_MESSAGE_ENV, PROXY_URL_ENV};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncFailure, SyncResult};
pub use progress::{Progress, ProgressObserver, Silent, SyncPhase};
pub use replay::{plan, FileWrite, WritePlan};
