//! Durable home of certificate records, their audit trail and revocations.
//!
//! Every status change goes through [`RecordStore::apply_transition`], which
//! updates the record only if it is still in the status the transition
//! starts from, and appends the audit event in the same transaction. Two
//! writers racing on one record cannot both win.

use std::collections::BTreeMap;
use std::time::Duration;

use certchain_core::Fingerprint;

use crate::types::{
    AuditEvent, CertificateRecord, CertificateStatus, ContentAddress, LedgerReference,
    LifecycleAction, RevocationRecord, VerificationStatus,
};
use crate::Result;

pub mod sqlite;

pub use sqlite::SqliteRecordStore;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub subject_id: Option<String>,
    pub issuer_id: Option<String>,
    pub status: Option<CertificateStatus>,
    /// Defaults to 20, capped at 100.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

/// A lifecycle step after `request`, with whatever it attaches to the record.
#[derive(Clone, Debug)]
pub struct Transition {
    pub action: LifecycleAction,
    pub actor: Option<String>,
    pub ledger_reference: Option<LedgerReference>,
    pub content_address: Option<ContentAddress>,
    pub document_hash: Option<String>,
    pub status_reason: Option<String>,
    /// Issue claim the caller must still hold for the update to apply.
    pub claim: Option<String>,
    pub ledger_revocation_reference: Option<LedgerReference>,
}

impl Transition {
    fn bare(action: LifecycleAction, actor: Option<String>) -> Self {
        Self {
            action,
            actor,
            ledger_reference: None,
            content_address: None,
            document_hash: None,
            status_reason: None,
            claim: None,
            ledger_revocation_reference: None,
        }
    }

    pub fn approve(
        content_address: Option<ContentAddress>,
        document_hash: Option<String>,
        actor: Option<String>,
    ) -> Self {
        Self {
            content_address,
            document_hash,
            ..Self::bare(LifecycleAction::Approve, actor)
        }
    }

    pub fn reject(reason: impl Into<String>, actor: Option<String>) -> Self {
        Self {
            status_reason: Some(reason.into()),
            ..Self::bare(LifecycleAction::Reject, actor)
        }
    }

    pub fn issue(reference: LedgerReference, claim: Option<String>, actor: Option<String>) -> Self {
        Self {
            ledger_reference: Some(reference),
            claim,
            ..Self::bare(LifecycleAction::Issue, actor)
        }
    }

    pub fn revoke(
        reason: impl Into<String>,
        revoked_by: impl Into<String>,
        ledger_revocation_reference: Option<LedgerReference>,
    ) -> Self {
        Self {
            status_reason: Some(reason.into()),
            ledger_revocation_reference,
            ..Self::bare(LifecycleAction::Revoke, Some(revoked_by.into()))
        }
    }

    /// What the audit event records about this step.
    pub(crate) fn audit_detail(&self) -> BTreeMap<String, String> {
        let mut detail = BTreeMap::new();
        if let Some(v) = self.ledger_reference.as_ref() {
            detail.insert("ledgerReference".to_string(), v.0.clone());
        }
        if let Some(v) = self.content_address.as_ref() {
            detail.insert("contentAddress".to_string(), v.0.clone());
        }
        if let Some(v) = self.document_hash.as_ref() {
            detail.insert("documentHash".to_string(), v.clone());
        }
        if let Some(v) = self.status_reason.as_ref() {
            detail.insert("reason".to_string(), v.clone());
        }
        if let Some(v) = self.ledger_revocation_reference.as_ref() {
            detail.insert("ledgerRevocationReference".to_string(), v.0.clone());
        }
        detail
    }
}

/// Result of [`RecordStore::claim_issue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssueClaim {
    /// Nobody was issuing this record.
    Acquired,
    /// A previous issue attempt stalled past the claim TTL. It may have
    /// anchored the fingerprint before dying, so the ledger must be checked
    /// before submitting again.
    TakenOver { previous_claimed_at: String },
}

pub trait RecordStore: Send + Sync {
    /// Persist a new `REQUESTED` record and its first audit event.
    ///
    /// Fails with `DuplicateFingerprint` if any record already carries the
    /// same fingerprint.
    fn insert(&self, record: &CertificateRecord, actor: Option<&str>) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<CertificateRecord>>;

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<CertificateRecord>>;

    /// Newest first.
    fn list(&self, filter: &ListFilter) -> Result<Vec<CertificateRecord>>;

    /// Apply a lifecycle step if the record is still in its starting status.
    ///
    /// Fails with `NotFound`, `InvalidTransition` (carrying the status the
    /// record is actually in), or `Conflict` when the issue claim named by
    /// the transition is no longer held.
    fn apply_transition(&self, id: &str, transition: &Transition) -> Result<CertificateRecord>;

    /// Mark an `APPROVED` record as being issued by the holder of `token`.
    ///
    /// A live claim held by someone else is a `Conflict`; one older than
    /// `ttl` is taken over.
    fn claim_issue(&self, id: &str, token: &str, ttl: Duration) -> Result<IssueClaim>;

    /// Drop the issue claim if `token` still holds it.
    fn release_issue_claim(&self, id: &str, token: &str) -> Result<()>;

    /// Cache the last verification outcome. Not a lifecycle transition.
    fn set_verification_status(&self, id: &str, status: VerificationStatus) -> Result<()>;

    fn get_revocation(&self, id: &str) -> Result<Option<RevocationRecord>>;

    /// Audit events in sequence order.
    fn history(&self, id: &str) -> Result<Vec<AuditEvent>>;

    /// Whether the stored audit trail of `id` is an intact hash chain.
    fn verify_history(&self, id: &str) -> Result<bool> {
        Ok(crate::audit::verify_chain(&self.history(id)?))
    }
}
