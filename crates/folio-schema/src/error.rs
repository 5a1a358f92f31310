use thiserror::Error;

/// Errors from parsing type definitions or checking edits against them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The type-definition source is not valid TOML.
    #[error("unparsable type definitions: {0}")]
    Parse(String),

    #[error("invalid definition for type {type_name}: {reason}")]
    InvalidType { type_name: String, reason: String },

    #[error("invalid definition for {type_name}.{field}: {reason}")]
    InvalidField {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("unknown object type: {0}")]
    UnknownType(String),

    #[error("type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("{type_name}.{field} is not a child list")]
    NotChildField { type_name: String, field: String },

    #[error("value for {type_name}.{field} does not match its definition")]
    ValueMismatch { type_name: String, field: String },
}

pub type SchemaResult<T> = Result<T, SchemaError>;
