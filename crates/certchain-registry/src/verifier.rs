//! Certificate verification against the archived document hash and the
//! ledger anchor.
//!
//! A verdict never fails because the certificate turned out to be invalid;
//! integrity mismatches are reported in the result. Only a missing record
//! or a store failure is an error.

use std::sync::Arc;
use std::time::Duration;

use certchain_core::sha256_hex;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::{
    bounded, ContentStore, LedgerAdapter, LedgerQuery, LedgerRecord, CONTENT_STORE, LEDGER,
};
use crate::lifecycle::DEFAULT_ADAPTER_TIMEOUT;
use crate::store::RecordStore;
use crate::types::{CertificateRecord, CertificateStatus, VerificationStatus};
use crate::{Error, Result};

/// Outcome of comparing uploaded bytes with the recorded document hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCheck {
    /// No bytes were supplied.
    NotRequested,
    Match,
    Mismatch,
    /// Bytes were supplied but no document was archived at approval.
    NoDocumentOnRecord,
}

impl DocumentCheck {
    pub fn is_valid(self) -> bool {
        matches!(self, DocumentCheck::NotRequested | DocumentCheck::Match)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCheck {
    Anchored,
    NotAnchored,
    /// The anchor carries another fingerprint, or none the ledger would name.
    FingerprintMismatch,
    /// No answer from the ledger; the verdict may change on retry.
    #[serde(rename = "ledger_unreachable")]
    Unreachable,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub document: DocumentCheck,
    pub ledger: LedgerCheck,
    /// Submitter, block and timestamp of the anchor, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<LedgerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
    pub revoked: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub certificate_id: String,
    /// Current lifecycle status. `overallValid` with `REVOKED` reads as
    /// "was valid, now revoked".
    pub status: CertificateStatus,
    pub hash_valid: bool,
    pub ledger_valid: bool,
    pub overall_valid: bool,
    pub retryable: bool,
    pub verified_at: String,
    pub details: VerificationDetails,
}

pub struct Verifier {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerAdapter>,
    content: Arc<dyn ContentStore>,
    adapter_timeout: Duration,
}

impl Verifier {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerAdapter>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            store,
            ledger,
            content,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Verify certificate `id`, optionally against a presented document.
    pub async fn verify(&self, id: &str, uploaded: Option<&[u8]>) -> Result<VerificationResult> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;

        let document = check_document(&record, uploaded);
        let (ledger, anchor, ledger_error, retryable) = self.check_ledger(&record).await;

        let hash_valid = document.is_valid();
        let ledger_valid = ledger == LedgerCheck::Anchored;
        let overall_valid = hash_valid && ledger_valid;
        let revoked = record.status == CertificateStatus::Revoked
            || anchor.as_ref().is_some_and(|a| a.revoked);

        let cached = if overall_valid {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };
        if let Err(e) = self.store.set_verification_status(id, cached) {
            tracing::warn!(certificate_id = %id, error = %e, "Failed to cache verification status");
        }

        tracing::info!(
            certificate_id = %id,
            fingerprint = %record.fingerprint,
            hash_valid,
            ledger_valid,
            overall_valid,
            retryable,
            status = %record.status,
            "Certificate verified"
        );

        Ok(VerificationResult {
            certificate_id: record.id,
            status: record.status,
            hash_valid,
            ledger_valid,
            overall_valid,
            retryable,
            verified_at: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            details: VerificationDetails {
                document,
                ledger,
                anchor,
                ledger_error,
                revoked,
            },
        })
    }

    async fn check_ledger(
        &self,
        record: &CertificateRecord,
    ) -> (LedgerCheck, Option<LedgerRecord>, Option<String>, bool) {
        let query = match record.ledger_reference.clone() {
            Some(reference) => LedgerQuery::ByReference(reference),
            None => LedgerQuery::ByFingerprint(record.fingerprint),
        };
        tracing::debug!(certificate_id = %record.id, query = ?query, "Looking up ledger anchor");

        match bounded(self.adapter_timeout, self.ledger.lookup(&query)).await {
            Ok(found) if !found.anchored => (LedgerCheck::NotAnchored, None, None, false),
            Ok(found) if found.fingerprint != Some(record.fingerprint) => {
                tracing::warn!(
                    certificate_id = %record.id,
                    fingerprint = %record.fingerprint,
                    anchored_fingerprint = ?found.fingerprint,
                    "Ledger anchor does not carry the record's fingerprint"
                );
                (LedgerCheck::FingerprintMismatch, Some(found), None, false)
            }
            Ok(found) => (LedgerCheck::Anchored, Some(found), None, false),
            Err(e) => {
                let retryable = e.is_retryable();
                tracing::warn!(certificate_id = %record.id, error = %e, retryable, "Ledger lookup failed");
                let check = if retryable {
                    LedgerCheck::Unreachable
                } else {
                    LedgerCheck::Rejected
                };
                let message = Error::from_adapter(LEDGER, e).to_string();
                (check, None, Some(message), retryable)
            }
        }
    }

    /// Fetch the archived document of `id`. `None` when nothing was archived.
    ///
    /// Bytes that do not hash to the recorded `documentHash` are refused.
    pub async fn retrieve_document(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        let Some(address) = record.content_address.as_ref() else {
            return Ok(None);
        };

        let bytes = bounded(self.adapter_timeout, self.content.get(address))
            .await
            .map_err(|e| Error::from_adapter(CONTENT_STORE, e))?;

        if let Some(expected) = record.document_hash.as_deref() {
            if !sha256_hex(&bytes).eq_ignore_ascii_case(expected) {
                tracing::warn!(certificate_id = %id, content_address = %address, "Archived document does not match its hash");
                return Err(Error::AdapterRejected {
                    adapter: CONTENT_STORE,
                    message: format!("{address} does not match the recorded document hash"),
                });
            }
        }
        Ok(Some(bytes))
    }
}

fn check_document(record: &CertificateRecord, uploaded: Option<&[u8]>) -> DocumentCheck {
    let Some(bytes) = uploaded else {
        return DocumentCheck::NotRequested;
    };
    match record.document_hash.as_deref() {
        None => DocumentCheck::NoDocumentOnRecord,
        Some(expected) if sha256_hex(bytes).eq_ignore_ascii_case(expected) => DocumentCheck::Match,
        Some(_) => DocumentCheck::Mismatch,
    }
}
