//! Frame operation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Column length mismatch: expected {expected}, got {actual} for '{column}'")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
