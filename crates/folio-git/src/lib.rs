//! Git primitives for folio.
//!
//! The sync engine never talks to git directly. It drives a [`Repository`]:
//! a working tree with clone/pull/commit/push plus file access, with every
//! network call taking an [`AuthProvider`] that is asked for credentials once
//! per attempt.
//!
//! # Backends
//!
//! - [`MemoryRepository`] with a [`SimulatedRemote`]: fully in-process, with
//!   failure injection and "another client" commits for tests
//! - `Git2Repository` (feature `libgit2`): a real checkout on disk

pub mod auth;
pub mod error;
#[cfg(feature = "libgit2")]
pub mod libgit2;
pub mod memory;
pub mod repository;

pub use auth::{Anonymous, AuthProvider, Credentials, TokenAuth, MAX_AUTH_ATTEMPTS};
pub use error::{GitError, GitResult};
#[cfg(feature = "libgit2")]
pub use libgit2::Git2Repository;
pub use memory::{Hold, MemoryRepository, RemoteOp, SimulatedRemote};
pub use repository::{
    normalize_path, CommitInfo, NetworkOptions, Repository, Transfer, TransferObserver,
};
