//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("credential not found: index {0}")]
    NotFound(usize),

    #[error("no other usable credential to rotate to")]
    RotationExhausted,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
