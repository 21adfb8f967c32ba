//! Contracts for the external ledger and content store.
//!
//! Adapters report failures as [`AdapterError`]; the lifecycle controller and
//! the verifier translate those into the crate error taxonomy, so transport
//! errors never cross this boundary.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use certchain_core::Fingerprint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ContentAddress, LedgerReference};

pub mod eth_rpc;
pub mod ipfs;
pub mod memory;

pub use eth_rpc::{EthRpcLedger, EthRpcLedgerConfig};
pub use ipfs::IpfsContentStore;
pub use memory::{InMemoryContentStore, InMemoryLedger};

pub(crate) const LEDGER: &str = "ledger";
pub(crate) const CONTENT_STORE: &str = "content store";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Could not reach the backend. Retryable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// No answer within the bound. Retryable, and says nothing about whether
    /// the data exists.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered and refused. Not retryable.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Unavailable(_) | AdapterError::Timeout(_))
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// What to look up on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerQuery {
    ByFingerprint(Fingerprint),
    ByReference(LedgerReference),
}

/// What the ledger knows about an anchored fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub anchored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<LedgerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter_address: Option<String>,
    /// Unix seconds of the anchoring block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// A revocation fact has been recorded on the ledger as well.
    #[serde(default)]
    pub revoked: bool,
}

impl LedgerRecord {
    /// The ledger answered and has no such record.
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Distributed ledger holding fingerprint anchors.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Anchor a fingerprint and return the reference of the anchoring transaction.
    async fn submit(&self, fingerprint: &Fingerprint) -> AdapterResult<LedgerReference>;

    /// Read an anchor back. An unknown fingerprint or reference is
    /// `Ok(LedgerRecord::absent())`, not an error.
    async fn lookup(&self, query: &LedgerQuery) -> AdapterResult<LedgerRecord>;

    /// Record that an anchored fingerprint has been revoked. The issuance
    /// record stays on the ledger; revocation is an additional fact.
    ///
    /// Ledgers without revocation support keep the default, which records
    /// nothing.
    async fn revoke(
        &self,
        _fingerprint: &Fingerprint,
        _reference: &LedgerReference,
    ) -> AdapterResult<Option<LedgerReference>> {
        Ok(None)
    }
}

/// Content-addressed blob store for certificate documents.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> AdapterResult<ContentAddress>;

    async fn get(&self, address: &ContentAddress) -> AdapterResult<Vec<u8>>;
}

/// Run an adapter call with an upper bound on its duration.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(limit)),
    }
}
