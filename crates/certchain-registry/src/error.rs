//! Error taxonomy for the certificate registry.

use thiserror::Error;

use crate::adapters::AdapterError;
use crate::types::{CertificateStatus, LifecycleAction};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid certificate data: {0}")]
    Validation(#[from] certchain_core::Error),

    #[error("A certificate with fingerprint {fingerprint} already exists")]
    DuplicateFingerprint { fingerprint: String },

    #[error("Certificate not found: {id}")]
    NotFound { id: String },

    #[error("Cannot {action} certificate {id} in status {from}")]
    InvalidTransition {
        id: String,
        action: LifecycleAction,
        from: CertificateStatus,
    },

    #[error("{adapter} unavailable: {message}")]
    AdapterUnavailable {
        adapter: &'static str,
        message: String,
    },

    #[error("{adapter} rejected the request: {message}")]
    AdapterRejected {
        adapter: &'static str,
        message: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AdapterUnavailable { .. } | Error::Conflict(_))
    }

    /// Re-classify an adapter failure at the adapter boundary.
    pub(crate) fn from_adapter(adapter: &'static str, err: AdapterError) -> Self {
        match err {
            AdapterError::Unavailable(message) => Error::AdapterUnavailable { adapter, message },
            AdapterError::Timeout(after) => Error::AdapterUnavailable {
                adapter,
                message: format!("timed out after {} ms", after.as_millis()),
            },
            AdapterError::Rejected(message) => Error::AdapterRejected { adapter, message },
            AdapterError::NotFound(what) => Error::AdapterRejected {
                adapter,
                message: format!("not found: {what}"),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
