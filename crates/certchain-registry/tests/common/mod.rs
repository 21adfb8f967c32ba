//! Shared fixtures: a registry over in-memory SQLite, plus adapters whose
//! failures can be switched on mid-test.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use certchain_core::{CertificateAttributes, Fingerprint};
use certchain_registry::adapters::{AdapterResult, InMemoryContentStore, InMemoryLedger};
use certchain_registry::store::{IssueClaim, Transition};
use certchain_registry::{
    AdapterError, ApproveInput, AuditEvent, CertificateRecord, ContentAddress, ContentStore,
    Error, LedgerAdapter, LedgerQuery, LedgerRecord, LedgerReference, LifecycleAction,
    LifecycleSettings, ListFilter, RecordStore, Registry, RequestInput, Result,
    RevocationRecord, SqliteRecordStore, VerificationStatus,
};

pub fn attributes(subject: &str) -> CertificateAttributes {
    CertificateAttributes::new(subject, "Distributed Systems", "2024-06-30", "State University")
        .unwrap()
}

pub fn request_input(subject: &str) -> RequestInput {
    RequestInput {
        attributes: attributes(subject),
        subject_id: format!("student-{}", subject.to_lowercase()),
        issuer_id: "state-university".to_string(),
        actor: Some("registrar".to_string()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerMode {
    Healthy,
    /// Every call fails as if the node were down.
    Unreachable,
    /// Every call blocks for an hour.
    Hanging,
    /// Every call is refused by the node.
    Rejecting,
    /// Lookups report a fingerprint other than the one anchored.
    Forging,
    /// Lookups claim an anchor for anything without naming its fingerprint.
    Blind,
}

/// Wraps [`InMemoryLedger`] with switchable failure modes and counts submit
/// attempts.
pub struct ScriptedLedger {
    inner: InMemoryLedger,
    mode: Mutex<LedgerMode>,
    submit_delay: Duration,
    submits: AtomicUsize,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self {
            inner: InMemoryLedger::default(),
            mode: Mutex::new(LedgerMode::Healthy),
            submit_delay: Duration::ZERO,
            submits: AtomicUsize::new(0),
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn set_mode(&self, mode: LedgerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn mode(&self) -> LedgerMode {
        *self.mode.lock().unwrap()
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn anchored_count(&self) -> usize {
        self.inner.anchored_count()
    }

    async fn gate(&self) -> AdapterResult<()> {
        match self.mode() {
            LedgerMode::Unreachable => Err(AdapterError::Unavailable("connection refused".into())),
            LedgerMode::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AdapterError::Unavailable("gave up".into()))
            }
            LedgerMode::Rejecting => Err(AdapterError::Rejected("execution reverted".into())),
            LedgerMode::Healthy | LedgerMode::Forging | LedgerMode::Blind => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerAdapter for ScriptedLedger {
    async fn submit(&self, fingerprint: &Fingerprint) -> AdapterResult<LedgerReference> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.inner.submit(fingerprint).await
    }

    async fn lookup(&self, query: &LedgerQuery) -> AdapterResult<LedgerRecord> {
        self.gate().await?;
        if self.mode() == LedgerMode::Blind {
            return Ok(LedgerRecord {
                anchored: true,
                ..LedgerRecord::default()
            });
        }
        let mut record = self.inner.lookup(query).await?;
        if self.mode() == LedgerMode::Forging && record.anchored {
            record.fingerprint = Some(attributes("Mallory").fingerprint().unwrap());
        }
        Ok(record)
    }

    async fn revoke(
        &self,
        fingerprint: &Fingerprint,
        reference: &LedgerReference,
    ) -> AdapterResult<Option<LedgerReference>> {
        self.gate().await?;
        self.inner.revoke(fingerprint, reference).await
    }
}

/// Content store whose writes can be switched off.
#[derive(Default)]
pub struct ScriptedContentStore {
    inner: InMemoryContentStore,
    unavailable: Mutex<bool>,
}

impl ScriptedContentStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl ContentStore for ScriptedContentStore {
    async fn put(&self, bytes: &[u8]) -> AdapterResult<ContentAddress> {
        if *self.unavailable.lock().unwrap() {
            return Err(AdapterError::Unavailable("IPFS node is down".into()));
        }
        self.inner.put(bytes).await
    }

    async fn get(&self, address: &ContentAddress) -> AdapterResult<Vec<u8>> {
        if *self.unavailable.lock().unwrap() {
            return Err(AdapterError::Unavailable("IPFS node is down".into()));
        }
        self.inner.get(address).await
    }
}

/// Record store that fails the next transition of one kind after the
/// adapters have already been called.
pub struct FlakyStore {
    inner: SqliteRecordStore,
    fail_next: Mutex<Option<LifecycleAction>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteRecordStore::in_memory().unwrap(),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, action: LifecycleAction) {
        *self.fail_next.lock().unwrap() = Some(action);
    }
}

impl RecordStore for FlakyStore {
    fn insert(&self, record: &CertificateRecord, actor: Option<&str>) -> Result<()> {
        self.inner.insert(record, actor)
    }

    fn get(&self, id: &str) -> Result<Option<CertificateRecord>> {
        self.inner.get(id)
    }

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<CertificateRecord>> {
        self.inner.find_by_fingerprint(fingerprint)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<CertificateRecord>> {
        self.inner.list(filter)
    }

    fn apply_transition(&self, id: &str, transition: &Transition) -> Result<CertificateRecord> {
        let mut fail_next = self.fail_next.lock().unwrap();
        if *fail_next == Some(transition.action) {
            *fail_next = None;
            return Err(Error::Io(std::io::Error::other("disk I/O error")));
        }
        drop(fail_next);
        self.inner.apply_transition(id, transition)
    }

    fn claim_issue(&self, id: &str, token: &str, ttl: Duration) -> Result<IssueClaim> {
        self.inner.claim_issue(id, token, ttl)
    }

    fn release_issue_claim(&self, id: &str, token: &str) -> Result<()> {
        self.inner.release_issue_claim(id, token)
    }

    fn set_verification_status(&self, id: &str, status: VerificationStatus) -> Result<()> {
        self.inner.set_verification_status(id, status)
    }

    fn get_revocation(&self, id: &str) -> Result<Option<RevocationRecord>> {
        self.inner.get_revocation(id)
    }

    fn history(&self, id: &str) -> Result<Vec<AuditEvent>> {
        self.inner.history(id)
    }
}

pub struct Harness {
    pub registry: Registry,
    pub store: Arc<SqliteRecordStore>,
    pub ledger: Arc<ScriptedLedger>,
    pub content: Arc<ScriptedContentStore>,
}

pub fn harness() -> Harness {
    harness_with(ScriptedLedger::new(), LifecycleSettings::default())
}

pub fn harness_with(ledger: ScriptedLedger, settings: LifecycleSettings) -> Harness {
    harness_on(Arc::new(SqliteRecordStore::in_memory().unwrap()), ledger, settings)
}

pub fn harness_on(
    store: Arc<SqliteRecordStore>,
    ledger: ScriptedLedger,
    settings: LifecycleSettings,
) -> Harness {
    let ledger = Arc::new(ledger);
    let content = Arc::new(ScriptedContentStore::default());
    let registry = Registry::new(store.clone(), ledger.clone(), content.clone(), settings);
    Harness {
        registry,
        store,
        ledger,
        content,
    }
}

impl Harness {
    pub async fn approved(&self, subject: &str, document: Option<&[u8]>) -> CertificateRecord {
        let record = self
            .registry
            .lifecycle
            .request(request_input(subject))
            .await
            .unwrap();
        self.registry
            .lifecycle
            .approve(
                &record.id,
                ApproveInput {
                    document: document.map(<[u8]>::to_vec),
                    actor: Some("dean".to_string()),
                },
            )
            .await
            .unwrap()
    }

    pub async fn issued(&self, subject: &str, document: Option<&[u8]>) -> CertificateRecord {
        let record = self.approved(subject, document).await;
        self.registry
            .lifecycle
            .issue(&record.id, Some("registrar".to_string()))
            .await
            .unwrap()
    }
}
