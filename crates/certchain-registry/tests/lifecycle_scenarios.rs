//! Lifecycle scenarios against in-memory SQLite and scripted adapters.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use certchain_registry::{
    ApproveInput, CertificateStatus, Error, LedgerAdapter, LedgerQuery, LifecycleAction,
    LifecycleSettings, ListFilter, Registry, RejectInput, RevokeInput, SqliteRecordStore,
};
use common::{
    harness, harness_on, harness_with, request_input, FlakyStore, LedgerMode,
    ScriptedContentStore, ScriptedLedger,
};

fn revoke_input() -> RevokeInput {
    RevokeInput {
        reason: "academic misconduct".to_string(),
        revoked_by: "provost".to_string(),
    }
}

#[tokio::test]
async fn duplicate_request_is_rejected() {
    let h = harness();
    let first = h.registry.lifecycle.request(request_input("Alice")).await.unwrap();

    let err = h
        .registry
        .lifecycle
        .request(request_input("Alice"))
        .await
        .unwrap_err();
    match err {
        Error::DuplicateFingerprint { fingerprint } => {
            assert_eq!(fingerprint, first.fingerprint.to_hex());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Same attributes under another subject id are still the same certificate.
    let mut input = request_input("Alice");
    input.subject_id = "student-other".into();
    assert!(matches!(
        h.registry.lifecycle.request(input).await.unwrap_err(),
        Error::DuplicateFingerprint { .. }
    ));

    // A different subject is a different certificate.
    h.registry.lifecycle.request(request_input("Bob")).await.unwrap();
    assert_eq!(h.registry.lifecycle.list(&ListFilter::default()).unwrap().len(), 2);
}

#[tokio::test]
async fn fingerprint_stays_taken_after_rejection() {
    let h = harness();
    let first = h.registry.lifecycle.request(request_input("Alice")).await.unwrap();
    h.registry
        .lifecycle
        .reject(
            &first.id,
            RejectInput {
                reason: "transcript missing".into(),
                actor: None,
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.registry
            .lifecycle
            .request(request_input("Alice"))
            .await
            .unwrap_err(),
        Error::DuplicateFingerprint { .. }
    ));
}

#[tokio::test]
async fn invalid_input_is_a_validation_error() {
    let h = harness();
    let mut input = request_input("Alice");
    input.attributes.completion_date = "30/06/2024".into();
    let err = h.registry.lifecycle.request(input).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert!(h.registry.lifecycle.list(&ListFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn transitions_are_monotonic() {
    let h = harness();

    // revoke from REQUESTED
    let requested = h.registry.lifecycle.request(request_input("Alice")).await.unwrap();
    let err = h
        .registry
        .lifecycle
        .revoke(&requested.id, revoke_input())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: LifecycleAction::Revoke,
            from: CertificateStatus::Requested,
            ..
        }
    ));
    assert_eq!(h.registry.lifecycle.get(&requested.id).unwrap(), requested);

    // approve from ISSUED
    let issued = h.issued("Bob", None).await;
    let err = h
        .registry
        .lifecycle
        .approve(&issued.id, ApproveInput::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: LifecycleAction::Approve,
            from: CertificateStatus::Issued,
            ..
        }
    ));
    assert_eq!(h.registry.lifecycle.get(&issued.id).unwrap(), issued);

    // anything from REJECTED
    let rejected = h.registry.lifecycle.request(request_input("Carol")).await.unwrap();
    let rejected = h
        .registry
        .lifecycle
        .reject(
            &rejected.id,
            RejectInput {
                reason: "ineligible".into(),
                actor: Some("dean".into()),
            },
        )
        .await
        .unwrap();
    let id = rejected.id.clone();
    let lc = &h.registry.lifecycle;
    let attempts = [
        lc.approve(&id, ApproveInput::default()).await,
        lc.reject(
            &id,
            RejectInput {
                reason: "again".into(),
                actor: None,
            },
        )
        .await,
        lc.issue(&id, None).await,
        lc.revoke(&id, revoke_input()).await,
    ];
    for attempt in attempts {
        assert!(matches!(
            attempt.unwrap_err(),
            Error::InvalidTransition {
                from: CertificateStatus::Rejected,
                ..
            }
        ));
    }
    assert_eq!(lc.get(&id).unwrap(), rejected);
    assert_eq!(h.ledger.submits(), 1);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let h = harness();
    let err = h
        .registry
        .lifecycle
        .approve("cert_missing", ApproveInput::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { ref id } if id == "cert_missing"));
    assert!(matches!(
        h.registry.lifecycle.issue("cert_missing", None).await.unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[tokio::test]
async fn ledger_failure_leaves_record_approved() {
    let h = harness();
    let approved = h.approved("Alice", Some(b"%PDF-1.7 diploma")).await;

    h.ledger.set_mode(LedgerMode::Unreachable);
    let err = h
        .registry
        .lifecycle
        .issue(&approved.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AdapterUnavailable { adapter: "ledger", .. }), "{err:?}");
    assert!(err.is_retryable());

    let after = h.registry.lifecycle.get(&approved.id).unwrap();
    assert_eq!(after.status, CertificateStatus::Approved);
    assert_eq!(after.ledger_reference, None);
    assert_eq!(h.registry.lifecycle.history(&approved.id).unwrap().len(), 2);

    // The claim was released, so a retry goes through once the node is back.
    h.ledger.set_mode(LedgerMode::Healthy);
    let issued = h.registry.lifecycle.issue(&approved.id, None).await.unwrap();
    assert_eq!(issued.status, CertificateStatus::Issued);
    assert!(issued.ledger_reference.is_some());
    assert_eq!(h.ledger.anchored_count(), 1);
}

#[tokio::test]
async fn ledger_refusal_is_not_retryable() {
    let h = harness();
    let approved = h.approved("Alice", None).await;

    h.ledger.set_mode(LedgerMode::Rejecting);
    let err = h
        .registry
        .lifecycle
        .issue(&approved.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AdapterRejected { adapter: "ledger", .. }), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(
        h.registry.lifecycle.get(&approved.id).unwrap().status,
        CertificateStatus::Approved
    );
}

#[tokio::test(start_paused = true)]
async fn ledger_timeout_leaves_record_approved() {
    let h = harness_with(
        ScriptedLedger::new(),
        LifecycleSettings {
            adapter_timeout: Duration::from_millis(100),
            ..LifecycleSettings::default()
        },
    );
    let approved = h.approved("Alice", None).await;

    h.ledger.set_mode(LedgerMode::Hanging);
    let err = h
        .registry
        .lifecycle
        .issue(&approved.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AdapterUnavailable { .. }), "{err:?}");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("timed out"));

    let after = h.registry.lifecycle.get(&approved.id).unwrap();
    assert_eq!(after.status, CertificateStatus::Approved);
    assert_eq!(after.ledger_reference, None);

    h.ledger.set_mode(LedgerMode::Healthy);
    assert!(h.registry.lifecycle.issue(&approved.id, None).await.is_ok());
}

#[tokio::test]
async fn concurrent_issue_submits_once() {
    let h = harness_with(
        ScriptedLedger::new().with_submit_delay(Duration::from_millis(50)),
        LifecycleSettings::default(),
    );
    let approved = h.approved("Alice", None).await;

    let (a, b) = tokio::join!(
        h.registry.lifecycle.issue(&approved.id, None),
        h.registry.lifecycle.issue(&approved.id, None),
    );
    let results = [a, b];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(err, Error::Conflict(_)), "{err:?}");
    assert!(err.is_retryable());
    assert_eq!(h.ledger.submits(), 1);

    let issued = h.registry.lifecycle.get(&approved.id).unwrap();
    assert_eq!(issued.status, CertificateStatus::Issued);
    let events = h.registry.lifecycle.history(&approved.id).unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.action == LifecycleAction::Issue)
            .count(),
        1
    );
}

#[tokio::test]
async fn content_store_failure_leaves_record_requested() {
    let h = harness();
    let requested = h.registry.lifecycle.request(request_input("Alice")).await.unwrap();

    h.content.set_unavailable(true);
    let err = h
        .registry
        .lifecycle
        .approve(
            &requested.id,
            ApproveInput {
                document: Some(b"%PDF-1.7 diploma".to_vec()),
                actor: None,
            },
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::AdapterUnavailable { adapter: "content store", .. }),
        "{err:?}"
    );
    assert_eq!(h.registry.lifecycle.get(&requested.id).unwrap(), requested);
}

#[tokio::test]
async fn revoke_keeps_anchor_and_records_revocation() {
    let h = harness();
    let issued = h.issued("Alice", None).await;

    let revoked = h
        .registry
        .lifecycle
        .revoke(&issued.id, revoke_input())
        .await
        .unwrap();
    assert_eq!(revoked.status, CertificateStatus::Revoked);
    assert_eq!(revoked.ledger_reference, issued.ledger_reference);
    assert_eq!(revoked.status_reason.as_deref(), Some("academic misconduct"));

    let revocation = h.registry.lifecycle.revocation(&issued.id).unwrap().unwrap();
    assert_eq!(revocation.revoked_by, "provost");
    assert!(revocation.ledger_revocation_reference.is_some());

    let err = h
        .registry
        .lifecycle
        .revoke(&issued.id, revoke_input())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: CertificateStatus::Revoked,
            ..
        }
    ));
}

#[tokio::test]
async fn revoke_waits_for_the_ledger() {
    let h = harness();
    let issued = h.issued("Alice", None).await;

    h.ledger.set_mode(LedgerMode::Unreachable);
    let err = h
        .registry
        .lifecycle
        .revoke(&issued.id, revoke_input())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        h.registry.lifecycle.get(&issued.id).unwrap().status,
        CertificateStatus::Issued
    );
    assert!(h.registry.lifecycle.revocation(&issued.id).unwrap().is_none());
}

#[tokio::test]
async fn revoke_retry_adopts_revocation_already_on_ledger() {
    let store = Arc::new(FlakyStore::new());
    let ledger = Arc::new(ScriptedLedger::new());
    let registry = Registry::new(
        store.clone(),
        ledger.clone(),
        Arc::new(ScriptedContentStore::default()),
        LifecycleSettings::default(),
    );
    let lc = &registry.lifecycle;
    let record = lc.request(request_input("Alice")).await.unwrap();
    lc.approve(&record.id, ApproveInput::default()).await.unwrap();
    let issued = lc.issue(&record.id, None).await.unwrap();
    let reference = issued.ledger_reference.clone().unwrap();

    // The ledger records the revocation, then the store write fails.
    store.fail_next(LifecycleAction::Revoke);
    let err = lc.revoke(&issued.id, revoke_input()).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
    assert_eq!(lc.get(&issued.id).unwrap().status, CertificateStatus::Issued);
    let anchor = ledger
        .lookup(&LedgerQuery::ByReference(reference.clone()))
        .await
        .unwrap();
    assert!(anchor.revoked);

    let revoked = lc.revoke(&issued.id, revoke_input()).await.unwrap();
    assert_eq!(revoked.status, CertificateStatus::Revoked);
    assert_eq!(revoked.ledger_reference, Some(reference));

    let revocation = lc.revocation(&issued.id).unwrap().unwrap();
    assert_eq!(revocation.revoked_by, "provost");
    assert_eq!(revocation.ledger_revocation_reference, None);
    assert_eq!(lc.history(&issued.id).unwrap().len(), 4);
    assert!(lc.verify_history(&issued.id).unwrap());
}

#[tokio::test]
async fn audit_trail_records_every_transition() {
    let h = harness();
    let issued = h.issued("Alice", Some(b"%PDF-1.7 diploma")).await;
    h.registry
        .lifecycle
        .revoke(&issued.id, revoke_input())
        .await
        .unwrap();

    let events = h.registry.lifecycle.history(&issued.id).unwrap();
    let actions: Vec<_> = events.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        [
            LifecycleAction::Request,
            LifecycleAction::Approve,
            LifecycleAction::Issue,
            LifecycleAction::Revoke,
        ]
    );
    assert_eq!(events[0].actor.as_deref(), Some("registrar"));
    assert_eq!(events[1].from_status, Some(CertificateStatus::Requested));
    assert!(events[1].detail.contains_key("documentHash"));
    assert_eq!(
        events[2].detail.get("ledgerReference"),
        issued.ledger_reference.as_ref().map(|r| &r.0)
    );
    assert_eq!(events[3].actor.as_deref(), Some("provost"));
    for pair in events.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].content_hash);
    }
    assert!(h.registry.lifecycle.verify_history(&issued.id).unwrap());
}

#[tokio::test]
async fn audit_chain_detects_tampering_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");
    let store = Arc::new(SqliteRecordStore::new(&path).unwrap());
    let h = harness_on(store, ScriptedLedger::new(), LifecycleSettings::default());

    let issued = h.issued("Alice", None).await;
    assert!(h.registry.lifecycle.verify_history(&issued.id).unwrap());

    {
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute(
            "UPDATE certificate_events SET to_status = 'rejected' WHERE certificate_id = ?1 AND sequence = 2",
            rusqlite::params![issued.id],
        )
        .unwrap();
    }

    assert!(!h.registry.lifecycle.verify_history(&issued.id).unwrap());
}

#[tokio::test]
async fn list_filters_by_status_and_issuer() {
    let h = harness();
    h.issued("Alice", None).await;
    h.approved("Bob", None).await;
    h.registry.lifecycle.request(request_input("Carol")).await.unwrap();

    let lc = &h.registry.lifecycle;
    let issued = lc
        .list(&ListFilter {
            status: Some(CertificateStatus::Issued),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].attributes.subject_name, "Alice");

    let all = lc
        .list(&ListFilter {
            issuer_id: Some("state-university".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].attributes.subject_name, "Carol");

    let none = lc
        .list(&ListFilter {
            issuer_id: Some("other-university".into()),
            ..Default::default()
        })
        .unwrap();
    assert!(none.is_empty());
}
