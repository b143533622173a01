//! Database error types.

use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An update touched a different number of rows than it had to.
    #[error("{operation}: expected to update {expected} rows, updated {actual}")]
    UpdateMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl DatabaseError {
    /// Whether this error is a row-count assertion failure.
    pub fn is_update_mismatch(&self) -> bool {
        matches!(self, Self::UpdateMismatch { .. })
    }
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
