//! Records and caller-facing inputs.

use std::collections::BTreeMap;
use std::fmt;

use certchain_core::{CertificateAttributes, Fingerprint};
use serde::{Deserialize, Serialize};

/// Position of a certificate in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Requested,
    Approved,
    Rejected,
    Issued,
    Revoked,
}

impl CertificateStatus {
    /// `REJECTED` and `REVOKED` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, CertificateStatus::Rejected | CertificateStatus::Revoked)
    }

    /// Statuses that must carry a ledger reference.
    pub fn is_anchored(self) -> bool {
        matches!(self, CertificateStatus::Issued | CertificateStatus::Revoked)
    }

    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            CertificateStatus::Requested => "requested",
            CertificateStatus::Approved => "approved",
            CertificateStatus::Rejected => "rejected",
            CertificateStatus::Issued => "issued",
            CertificateStatus::Revoked => "revoked",
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(CertificateStatus::Requested),
            "approved" => Some(CertificateStatus::Approved),
            "rejected" => Some(CertificateStatus::Rejected),
            "issued" => Some(CertificateStatus::Issued),
            "revoked" => Some(CertificateStatus::Revoked),
            _ => None,
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateStatus::Requested => "REQUESTED",
            CertificateStatus::Approved => "APPROVED",
            CertificateStatus::Rejected => "REJECTED",
            CertificateStatus::Issued => "ISSUED",
            CertificateStatus::Revoked => "REVOKED",
        })
    }
}

/// Last verification outcome. A cache written by the verifier; nothing
/// branches on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "verified" => Some(VerificationStatus::Verified),
            "failed" => Some(VerificationStatus::Failed),
            _ => None,
        }
    }
}

/// Lifecycle operations, as recorded in the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Request,
    Approve,
    Reject,
    Issue,
    Revoke,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Request => "request",
            LifecycleAction::Approve => "approve",
            LifecycleAction::Reject => "reject",
            LifecycleAction::Issue => "issue",
            LifecycleAction::Revoke => "revoke",
        }
    }

    /// The only status this action may start from, and where it leads.
    pub fn edge(self) -> (Option<CertificateStatus>, CertificateStatus) {
        use CertificateStatus::*;
        match self {
            LifecycleAction::Request => (None, Requested),
            LifecycleAction::Approve => (Some(Requested), Approved),
            LifecycleAction::Reject => (Some(Requested), Rejected),
            LifecycleAction::Issue => (Some(Approved), Issued),
            LifecycleAction::Revoke => (Some(Issued), Revoked),
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "request" => Some(LifecycleAction::Request),
            "approve" => Some(LifecycleAction::Approve),
            "reject" => Some(LifecycleAction::Reject),
            "issue" => Some(LifecycleAction::Issue),
            "revoke" => Some(LifecycleAction::Revoke),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to the ledger transaction that anchors a fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerReference(pub String);

impl fmt::Display for LedgerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle into the content store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(pub String);

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub id: String,
    pub subject_id: String,
    pub issuer_id: String,
    pub attributes: CertificateAttributes,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_reference: Option<LedgerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<ContentAddress>,
    /// SHA-256 (lowercase hex) of the archived document bytes. Unrelated to
    /// `fingerprint`, which covers the attributes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<String>,
    pub status: CertificateStatus,
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub requested_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    pub attributes: CertificateAttributes,
    pub subject_id: String,
    pub issuer_id: String,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Approval, optionally archiving the certificate document.
#[derive(Clone, Debug, Default)]
pub struct ApproveInput {
    pub document: Option<Vec<u8>>,
    pub actor: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectInput {
    pub reason: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeInput {
    pub reason: String,
    pub revoked_by: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRecord {
    pub certificate_id: String,
    pub revoked_at: String,
    pub reason: String,
    pub revoked_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_revocation_reference: Option<LedgerReference>,
}

/// One entry of a certificate's hash-chained audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: String,
    pub certificate_id: String,
    pub sequence: u64,
    pub timestamp: String,
    pub action: LifecycleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<CertificateStatus>,
    pub to_status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Flat so that it canonicalizes the same way as the rest of the event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, String>,
    pub previous_hash: String,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    #[test]
    fn lifecycle_edges() {
        use CertificateStatus::*;
        assert_eq!(LifecycleAction::Request.edge(), (None, Requested));
        assert_eq!(LifecycleAction::Approve.edge(), (Some(Requested), Approved));
        assert_eq!(LifecycleAction::Reject.edge(), (Some(Requested), Rejected));
        assert_eq!(LifecycleAction::Issue.edge(), (Some(Approved), Issued));
        assert_eq!(LifecycleAction::Revoke.edge(), (Some(Issued), Revoked));
    }

    #[test]
    fn terminal_and_anchored_statuses() {
        use CertificateStatus::*;
        for s in [Requested, Approved, Issued] {
            assert!(!s.is_terminal(), "{s}");
        }
        for s in [Rejected, Revoked] {
            assert!(s.is_terminal(), "{s}");
        }
        assert!(Issued.is_anchored() && Revoked.is_anchored());
        assert!(!Approved.is_anchored());
    }

    #[test]
    fn db_strings_roundtrip() {
        use CertificateStatus::*;
        for s in [Requested, Approved, Rejected, Issued, Revoked] {
            assert_eq!(CertificateStatus::from_db_str(s.as_db_str()), Some(s));
        }
        assert_eq!(CertificateStatus::from_db_str("PENDING"), None);
    }

    #[test]
    fn status_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&CertificateStatus::Revoked).unwrap(),
            "\"REVOKED\""
        );
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Verified).unwrap(),
            "\"VERIFIED\""
        );
    }
}
