//! Foundation types for folio.
//!
//! This crate provides the identity, value, and edit-record types shared by
//! every other folio crate.
//!
//! # Key Types
//!
//! - [`ObjectId`]: content address (SHA-256) or client-minted `temp:` placeholder
//! - [`FieldValue`]: tagged field value: scalar, scalar list, or child list
//! - [`Object`]: a content object with its metadata (`id`, `name`, `location`)
//! - [`ChangeKey`]: unambiguous composite address of one editable field
//! - [`Change`] / [`Deletion`]: pending edit records kept by the ledger
//! - [`Author`]: commit identity

pub mod author;
pub mod change;
pub mod error;
pub mod object;
pub mod value;

pub use author::Author;
pub use change::{Change, ChangeKey, Deletion};
pub use error::TypeError;
pub use object::{is_meta_key, Object, ObjectId, META_KEYS};
pub use value::{FieldMap, FieldValue, Scalar};
