//! Error types for certchain-core operations

use thiserror::Error;

/// Errors raised while validating or hashing certificate data
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Missing required certificate field: {0}")]
    MissingField(&'static str),

    #[error("Certificate field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Unknown certificate field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },
}

/// Result type for certchain-core operations
pub type Result<T> = std::result::Result<T, Error>;
