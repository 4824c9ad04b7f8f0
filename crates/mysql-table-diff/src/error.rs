//! Error types for the diff library.

use std::time::Duration;

use thiserror::Error;

/// Main error type for diff operations.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (bad option values, unserializable fingerprint input).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Checkpoint read/write failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A fetched row is missing one of the order-key columns.
    #[error("Row from {table} is missing order-key column `{column}`")]
    MissingKeyColumn { table: String, column: String },

    /// A non-quoted order-key value failed to parse as a number.
    #[error("Cannot parse order-key column `{column}` value {value:?} as a number")]
    KeyParse { column: String, value: String },

    /// A bounded operation exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled.
    #[error("Diff cancelled")]
    Cancelled,

    /// IO error from the fix-SQL writer.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiffError {
    /// Create a Checkpoint error with context about where it occurred.
    pub fn checkpoint(message: impl Into<String>) -> Self {
        DiffError::Checkpoint(message.into())
    }

    /// Create a MissingKeyColumn error.
    pub fn missing_key(table: impl Into<String>, column: impl Into<String>) -> Self {
        DiffError::MissingKeyColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;
