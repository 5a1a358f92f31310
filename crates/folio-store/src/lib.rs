//! Object store for folio.
//!
//! The store holds the baseline that pending edits are layered onto: every
//! object file under the content root, parsed through an [`ObjectCodec`],
//! stamped with its metadata and content id, and grouped by type.
//!
//! A refresh is all-or-nothing. One unparsable file fails the refresh with
//! [`StoreError::Parse`] naming the file, and the previous snapshot stays.

pub mod codec;
pub mod error;
pub mod store;

pub use codec::{ObjectCodec, TomlCodec};
pub use error::{CodecError, CodecResult, StoreError, StoreResult};
pub use store::{ObjectStore, ObjectsData, StoreLayout};
