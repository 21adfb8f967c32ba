//! In-process ledger and content store.
//!
//! Useful for tests and single-process deployments; nothing here is durable.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use certchain_core::{sha256, sha256_hex, Fingerprint};
use chrono::Utc;

use super::{AdapterError, AdapterResult, ContentStore, LedgerAdapter, LedgerQuery, LedgerRecord};
use crate::types::{ContentAddress, LedgerReference};

pub const DEFAULT_SUBMITTER: &str = "0x0000000000000000000000000000000000c0ffee";

#[derive(Clone, Debug)]
struct Anchor {
    reference: LedgerReference,
    timestamp: i64,
    block_number: u64,
    revoked: bool,
}

#[derive(Default)]
struct LedgerState {
    anchors: HashMap<Fingerprint, Anchor>,
    by_reference: HashMap<LedgerReference, Fingerprint>,
    height: u64,
}

/// Ledger that keeps anchors in memory and behaves like an append-only
/// registry contract: a fingerprint can be anchored once.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    submitter_address: String,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMITTER)
    }
}

impl InMemoryLedger {
    pub fn new(submitter_address: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            submitter_address: submitter_address.into(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of anchored fingerprints.
    pub fn anchored_count(&self) -> usize {
        self.lock_state().anchors.len()
    }

    fn next_reference(state: &mut LedgerState, tag: &[u8], fingerprint: &Fingerprint) -> (LedgerReference, u64) {
        state.height = state.height.saturating_add(1);
        let mut preimage = Vec::with_capacity(tag.len() + 40);
        preimage.extend_from_slice(tag);
        preimage.extend_from_slice(fingerprint.as_hash().as_bytes());
        preimage.extend_from_slice(&state.height.to_be_bytes());
        (
            LedgerReference(sha256(&preimage).to_hex_prefixed()),
            state.height,
        )
    }

    fn to_record(&self, fingerprint: Fingerprint, anchor: &Anchor) -> LedgerRecord {
        LedgerRecord {
            anchored: true,
            fingerprint: Some(fingerprint),
            reference: Some(anchor.reference.clone()),
            submitter_address: Some(self.submitter_address.clone()),
            timestamp: Some(anchor.timestamp),
            block_number: Some(anchor.block_number),
            revoked: anchor.revoked,
        }
    }
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    async fn submit(&self, fingerprint: &Fingerprint) -> AdapterResult<LedgerReference> {
        let mut state = self.lock_state();
        if state.anchors.contains_key(fingerprint) {
            return Err(AdapterError::Rejected(format!(
                "fingerprint {fingerprint} is already anchored"
            )));
        }

        let (reference, block_number) = Self::next_reference(&mut state, b"anchor", fingerprint);
        state.anchors.insert(
            *fingerprint,
            Anchor {
                reference: reference.clone(),
                timestamp: Utc::now().timestamp(),
                block_number,
                revoked: false,
            },
        );
        state.by_reference.insert(reference.clone(), *fingerprint);
        Ok(reference)
    }

    async fn lookup(&self, query: &LedgerQuery) -> AdapterResult<LedgerRecord> {
        let state = self.lock_state();
        let fingerprint = match query {
            LedgerQuery::ByFingerprint(fp) => Some(*fp),
            LedgerQuery::ByReference(reference) => state.by_reference.get(reference).copied(),
        };
        let record = fingerprint
            .and_then(|fp| state.anchors.get(&fp).map(|anchor| self.to_record(fp, anchor)))
            .unwrap_or_else(LedgerRecord::absent);
        Ok(record)
    }

    async fn revoke(
        &self,
        fingerprint: &Fingerprint,
        _reference: &LedgerReference,
    ) -> AdapterResult<Option<LedgerReference>> {
        let mut state = self.lock_state();
        match state.anchors.get(fingerprint) {
            None => {
                return Err(AdapterError::Rejected(format!(
                    "fingerprint {fingerprint} is not anchored"
                )))
            }
            Some(anchor) if anchor.revoked => {
                return Err(AdapterError::Rejected(format!(
                    "fingerprint {fingerprint} is already revoked"
                )))
            }
            Some(_) => {}
        }

        let (reference, _) = Self::next_reference(&mut state, b"revoke", fingerprint);
        if let Some(anchor) = state.anchors.get_mut(fingerprint) {
            anchor.revoked = true;
        }
        Ok(Some(reference))
    }
}

/// Content store addressed by the SHA-256 of each payload.
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_blobs().is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, bytes: &[u8]) -> AdapterResult<ContentAddress> {
        let address = format!("sha256-{}", sha256_hex(bytes));
        self.lock_blobs().insert(address.clone(), bytes.to_vec());
        Ok(ContentAddress(address))
    }

    async fn get(&self, address: &ContentAddress) -> AdapterResult<Vec<u8>> {
        self.lock_blobs()
            .get(&address.0)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(address.0.clone()))
    }
}
