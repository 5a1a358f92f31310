//! Type registry for folio.
//!
//! Object types are declared in a TOML document at the repository root. Each
//! top-level table names a type; each key maps a field to a scalar kind, or
//! to a one-element array of tables describing the fields of a child list:
//!
//! ```toml
//! [post]
//! title = "string"
//! body = "markdown"
//!
//! [[post.sections]]
//! heading = "string"
//! image = "image"
//! ```
//!
//! Keys that configure presentation rather than content (`template`) and the
//! reserved metadata names are stripped while parsing.

pub mod error;
pub mod registry;

pub use error::{SchemaError, SchemaResult};
pub use registry::{ChildDefinition, FieldDefinition, ScalarKind, TypeDefinition, TypeRegistry};
