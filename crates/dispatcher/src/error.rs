//! Error types for dispatcher construction
//!
//! Per-request failures are never errors: they come back as an unsuccessful
//! `DispatchResult`. Only configuration that makes dispatch impossible is
//! rejected here.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("no candidate models configured")]
    NoModels,

    #[error("invalid model id: {0:?}")]
    InvalidModel(String),

    #[error("invalid dispatch policy: {0}")]
    InvalidPolicy(String),
}

/// Result alias for dispatcher construction.
pub type Result<T> = std::result::Result<T, Error>;
