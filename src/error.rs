//! Error types for LiveGrid.
//!
//! "Not found" is never an error here: store operations on unknown tables or
//! rows return `None`/`false`. The enums below cover programmer errors,
//! rejected edits and degraded auxiliary services.

use thiserror::Error;

/// A cell value that failed its column's validation rules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("'{column}' is required")]
    Required { column: String },

    #[error("'{column}' must be at least {min} characters (got {actual})")]
    TooShort { column: String, min: usize, actual: usize },

    #[error("'{column}' must be at most {max} characters (got {actual})")]
    TooLong { column: String, max: usize, actual: usize },

    #[error("'{column}' must be >= {min} (got {actual})")]
    BelowMinimum { column: String, min: f64, actual: f64 },

    #[error("'{column}' must be <= {max} (got {actual})")]
    AboveMaximum { column: String, max: f64, actual: f64 },

    #[error("'{column}' expects a number, got '{input}'")]
    NotANumber { column: String, input: String },

    #[error("'{column}' must be one of the configured options, got '{input}'")]
    UnknownOption { column: String, input: String },
}

/// Malformed schema changes. These indicate caller bugs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Column '{key}' already exists in table '{table_id}'")]
    DuplicateColumn { table_id: String, key: String },

    #[error("Reference column '{key}' must name a referenced table")]
    MissingReferenceTarget { key: String },

    #[error("Reference column '{key}' points at unknown table '{target}'")]
    UnknownReferenceTarget { key: String, target: String },

    #[error("Table '{0}' is a system table and cannot be deleted")]
    SystemTable(String),

    #[error("Role '{0}' is a system role and cannot be deleted")]
    SystemRole(String),
}

/// Failures of the presence/sync transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Broadcast transport is closed")]
    Disconnected,

    #[error("Receiver lagged behind and skipped {0} messages")]
    Lagged(u64),

    #[error("Malformed sync message: {0}")]
    Codec(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Formula parse or evaluation failure. Rendered as `#ERROR` in cells.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{name} expects {expected} arguments, got {actual}")]
    Arity {
        name: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("Expected a number, got '{0}'")]
    NotANumber(String),

    #[error("Division by zero")]
    DivisionByZero,
}

/// Failure reported by an annotation backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotateError {
    #[error("Annotation service unavailable: {0}")]
    Unavailable(String),

    #[error("Annotation service returned an unusable response: {0}")]
    BadResponse(String),
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum GridError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Cell {row_id}/{column} is being edited by {user_name}")]
    CellLocked {
        row_id: String,
        column: String,
        user_name: String,
    },

    #[error("Role '{role_id}' may not {action} in table '{table_id}'")]
    PermissionDenied {
        role_id: String,
        table_id: String,
        action: &'static str,
    },

    #[error("Row '{row_id}' no longer exists in table '{table_id}'")]
    RowNotFound { table_id: String, row_id: String },

    #[error("Operation not allowed while {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, GridError>;
