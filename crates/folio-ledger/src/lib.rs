//! Change ledger for folio.
//!
//! The ledger records pending edits between syncs: field [`Change`]s keyed
//! by [`ChangeKey`] (last write wins) and [`Deletion`]s of objects or child
//! elements. Nothing is written to the repository until a sync replays it.
//!
//! [`materialize`] layers the ledger over an [`ObjectStore`] snapshot to give
//! the objects the user actually sees. A ledger that no longer fits the
//! store is reset rather than left half-applied.
//!
//! [`PersistedState`] carries the ledger and the repository selection across
//! restarts through any [`StateStore`].
//!
//! [`Change`]: folio_types::Change
//! [`ChangeKey`]: folio_types::ChangeKey
//! [`Deletion`]: folio_types::Deletion
//! [`ObjectStore`]: folio_store::ObjectStore

pub mod error;
pub mod ledger;
pub mod overlay;
pub mod persist;

pub use error::{ConsistencyError, LedgerError, LedgerResult};
pub use ledger::{ChangeLedger, LedgerSnapshot};
pub use overlay::{apply_change, materialize, MaterializedObjects};
pub use persist::{FileStateStore, MemoryStateStore, PersistedState, StateStore};
