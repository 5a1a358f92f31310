//! Canonical content hashing for folio.
//!
//! An object's id is the SHA-256 digest of the canonical JSON encoding of its
//! content-bearing fields. Metadata (`id`, `name`, `location`, type) never
//! participates, so renaming or moving a file does not change its identity.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
