//! Certificate lifecycle controller.
//!
//! ```text
//! REQUESTED --approve--> APPROVED --issue--> ISSUED --revoke--> REVOKED
//! REQUESTED --reject-->  REJECTED
//! ```
//!
//! Adapter calls happen before the store transaction that records their
//! outcome, so a failed upload or ledger submission never leaves a record in
//! a status it cannot justify.

use std::sync::Arc;
use std::time::Duration;

use certchain_core::{sha256_hex, Fingerprint};
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::adapters::{bounded, ContentStore, LedgerAdapter, LedgerQuery, CONTENT_STORE, LEDGER};
use crate::store::{IssueClaim, ListFilter, RecordStore, Transition};
use crate::types::{
    ApproveInput, AuditEvent, CertificateRecord, CertificateStatus, LedgerReference,
    LifecycleAction, RejectInput, RequestInput, RevocationRecord, RevokeInput,
    VerificationStatus,
};
use crate::{Error, Result};

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Upper bound on every ledger and content-store call.
    pub adapter_timeout: Duration,
    /// Age after which an issue claim is considered abandoned.
    pub claim_ttl: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }
}

pub struct LifecycleController {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerAdapter>,
    content: Arc<dyn ContentStore>,
    settings: LifecycleSettings,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerAdapter>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            store,
            ledger,
            content,
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> LifecycleSettings {
        self.settings
    }

    /// Register a certificate request.
    pub async fn request(&self, input: RequestInput) -> Result<CertificateRecord> {
        require_non_blank("subjectId", &input.subject_id)?;
        require_non_blank("issuerId", &input.issuer_id)?;
        let fingerprint = input.attributes.fingerprint()?;

        if let Some(existing) = self.store.find_by_fingerprint(&fingerprint)? {
            tracing::warn!(
                fingerprint = %fingerprint,
                existing_id = %existing.id,
                existing_status = %existing.status,
                "Rejected duplicate certificate request"
            );
            return Err(Error::DuplicateFingerprint {
                fingerprint: fingerprint.to_hex(),
            });
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let record = CertificateRecord {
            id: format!("cert_{}", Uuid::now_v7()),
            subject_id: input.subject_id,
            issuer_id: input.issuer_id,
            attributes: input.attributes,
            fingerprint,
            ledger_reference: None,
            content_address: None,
            document_hash: None,
            status: CertificateStatus::Requested,
            verification_status: VerificationStatus::Pending,
            status_reason: None,
            requested_at: now.clone(),
            updated_at: now,
        };
        self.store.insert(&record, input.actor.as_deref())?;

        tracing::info!(
            certificate_id = %record.id,
            fingerprint = %record.fingerprint,
            "Certificate requested"
        );
        Ok(record)
    }

    /// Approve a request, archiving the certificate document first if one is
    /// supplied.
    pub async fn approve(&self, id: &str, input: ApproveInput) -> Result<CertificateRecord> {
        let record = self.require_status(id, LifecycleAction::Approve)?;

        let (content_address, document_hash) = match input.document.as_deref() {
            Some(bytes) => {
                let address = bounded(self.settings.adapter_timeout, self.content.put(bytes))
                    .await
                    .map_err(|e| {
                        tracing::warn!(certificate_id = %id, error = %e, "Document upload failed");
                        Error::from_adapter(CONTENT_STORE, e)
                    })?;
                tracing::debug!(certificate_id = %id, content_address = %address, "Archived certificate document");
                (Some(address), Some(sha256_hex(bytes)))
            }
            None => (None, None),
        };

        let updated = self.store.apply_transition(
            id,
            &Transition::approve(content_address, document_hash, input.actor),
        )?;
        log_transition(&record, &updated);
        Ok(updated)
    }

    pub async fn reject(&self, id: &str, input: RejectInput) -> Result<CertificateRecord> {
        require_non_blank("reason", &input.reason)?;
        let record = self.require_status(id, LifecycleAction::Reject)?;
        let updated = self
            .store
            .apply_transition(id, &Transition::reject(input.reason, input.actor))?;
        log_transition(&record, &updated);
        Ok(updated)
    }

    /// Anchor the fingerprint on the ledger and mark the record issued.
    ///
    /// At most one caller at a time gets past the issue claim; the others
    /// fail with a retryable `Conflict` before touching the ledger.
    pub async fn issue(&self, id: &str, actor: Option<String>) -> Result<CertificateRecord> {
        let token = format!("claim_{}", Uuid::now_v7());
        let claim = self.store.claim_issue(id, &token, self.settings.claim_ttl)?;
        let record = self.require(id)?;

        let reference = match self.anchor(&record, &claim).await {
            Ok(reference) => reference,
            Err(err) => {
                if let Err(release_err) = self.store.release_issue_claim(id, &token) {
                    tracing::warn!(certificate_id = %id, error = %release_err, "Failed to release issue claim");
                }
                return Err(err);
            }
        };

        let updated = self
            .store
            .apply_transition(id, &Transition::issue(reference, Some(token), actor))?;
        log_transition(&record, &updated);
        Ok(updated)
    }

    async fn anchor(&self, record: &CertificateRecord, claim: &IssueClaim) -> Result<LedgerReference> {
        let timeout = self.settings.adapter_timeout;

        // An abandoned attempt may have anchored the fingerprint before it
        // died; the ledger would refuse a second anchor.
        if let IssueClaim::TakenOver { previous_claimed_at } = claim {
            tracing::warn!(
                certificate_id = %record.id,
                previous_claimed_at = %previous_claimed_at,
                "Taking over stale issue claim"
            );
            let existing = bounded(
                timeout,
                self.ledger
                    .lookup(&LedgerQuery::ByFingerprint(record.fingerprint)),
            )
            .await
            .map_err(|e| ledger_failure(&record.id, e))?;

            if existing.anchored {
                return match existing.reference {
                    Some(reference) => {
                        tracing::info!(
                            certificate_id = %record.id,
                            ledger_reference = %reference,
                            "Adopting existing ledger anchor"
                        );
                        Ok(reference)
                    }
                    None => Err(Error::Conflict(format!(
                        "fingerprint {} is already anchored but the ledger did not return its reference",
                        record.fingerprint
                    ))),
                };
            }
        }

        bounded(timeout, self.ledger.submit(&record.fingerprint))
            .await
            .map_err(|e| ledger_failure(&record.id, e))
    }

    /// Revoke an issued certificate. The issuance anchor stays on the ledger.
    pub async fn revoke(&self, id: &str, input: RevokeInput) -> Result<CertificateRecord> {
        require_non_blank("reason", &input.reason)?;
        require_non_blank("revokedBy", &input.revoked_by)?;
        let record = self.require_status(id, LifecycleAction::Revoke)?;

        let ledger_revocation_reference = match record.ledger_reference.as_ref() {
            Some(reference) => self.revoke_on_ledger(&record, reference).await?,
            None => None,
        };

        let updated = self.store.apply_transition(
            id,
            &Transition::revoke(input.reason, input.revoked_by, ledger_revocation_reference),
        )?;
        log_transition(&record, &updated);
        Ok(updated)
    }

    async fn revoke_on_ledger(
        &self,
        record: &CertificateRecord,
        reference: &LedgerReference,
    ) -> Result<Option<LedgerReference>> {
        let timeout = self.settings.adapter_timeout;

        // An earlier attempt may have revoked on the ledger and then failed to
        // commit; the ledger would refuse a second revocation.
        let existing = bounded(
            timeout,
            self.ledger.lookup(&LedgerQuery::ByReference(reference.clone())),
        )
        .await
        .map_err(|e| ledger_failure(&record.id, e))?;
        if existing.revoked {
            tracing::info!(
                certificate_id = %record.id,
                ledger_reference = %reference,
                "Adopting existing ledger revocation"
            );
            return Ok(None);
        }

        bounded(timeout, self.ledger.revoke(&record.fingerprint, reference))
            .await
            .map_err(|e| ledger_failure(&record.id, e))
    }

    pub fn get(&self, id: &str) -> Result<CertificateRecord> {
        self.require(id)
    }

    pub fn get_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<CertificateRecord>> {
        self.store.find_by_fingerprint(fingerprint)
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<CertificateRecord>> {
        self.store.list(filter)
    }

    pub fn history(&self, id: &str) -> Result<Vec<AuditEvent>> {
        self.require(id)?;
        self.store.history(id)
    }

    pub fn verify_history(&self, id: &str) -> Result<bool> {
        self.require(id)?;
        self.store.verify_history(id)
    }

    pub fn revocation(&self, id: &str) -> Result<Option<RevocationRecord>> {
        self.require(id)?;
        self.store.get_revocation(id)
    }

    fn require(&self, id: &str) -> Result<CertificateRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Load `id` and check it can take `action`, before any adapter is called.
    /// The store re-checks when the transition is applied.
    fn require_status(&self, id: &str, action: LifecycleAction) -> Result<CertificateRecord> {
        let record = self.require(id)?;
        let (from, _) = action.edge();
        if from != Some(record.status) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                action,
                from: record.status,
            });
        }
        Ok(record)
    }
}

fn require_non_blank(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(certchain_core::Error::EmptyField(field).into());
    }
    Ok(())
}

fn ledger_failure(id: &str, err: crate::adapters::AdapterError) -> Error {
    tracing::warn!(certificate_id = %id, error = %err, "Ledger call failed");
    Error::from_adapter(LEDGER, err)
}

fn log_transition(before: &CertificateRecord, after: &CertificateRecord) {
    tracing::info!(
        certificate_id = %after.id,
        fingerprint = %after.fingerprint,
        from = %before.status,
        to = %after.status,
        ledger_reference = after.ledger_reference.as_ref().map(|r| r.0.as_str()),
        "Certificate transitioned"
    );
}
