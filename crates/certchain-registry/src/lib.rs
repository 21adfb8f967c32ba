#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # certchain-registry
//!
//! Academic certificate registry: lifecycle, ledger anchoring and
//! verification.
//!
//! - [`LifecycleController`] moves records through
//!   `REQUESTED -> APPROVED -> ISSUED -> REVOKED` (or `REJECTED`), archiving
//!   documents in a [`ContentStore`] and anchoring fingerprints on a
//!   [`LedgerAdapter`].
//! - [`Verifier`] checks a certificate against its archived document hash and
//!   its ledger anchor.
//! - [`SqliteRecordStore`] keeps records, a hash-chained audit trail per
//!   certificate and revocations.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use certchain_core::CertificateAttributes;
//! use certchain_registry::adapters::{InMemoryContentStore, InMemoryLedger};
//! use certchain_registry::{ApproveInput, Registry, RequestInput, SqliteRecordStore};
//!
//! # async fn demo() -> certchain_registry::Result<()> {
//! let registry = Registry::new(
//!     Arc::new(SqliteRecordStore::in_memory()?),
//!     Arc::new(InMemoryLedger::default()),
//!     Arc::new(InMemoryContentStore::new()),
//!     Default::default(),
//! );
//!
//! let record = registry
//!     .lifecycle
//!     .request(RequestInput {
//!         attributes: CertificateAttributes::new("Alice", "CS101", "2024-01-01", "State University")?,
//!         subject_id: "student-42".into(),
//!         issuer_id: "state-university".into(),
//!         actor: None,
//!     })
//!     .await?;
//! registry.lifecycle.approve(&record.id, ApproveInput::default()).await?;
//! registry.lifecycle.issue(&record.id, None).await?;
//!
//! let verdict = registry.verifier.verify(&record.id, None).await?;
//! assert!(verdict.overall_valid);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod adapters;
pub mod audit;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod types;
pub mod verifier;

pub use adapters::{AdapterError, ContentStore, LedgerAdapter, LedgerQuery, LedgerRecord};
pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleController, LifecycleSettings};
pub use store::{ListFilter, RecordStore, SqliteRecordStore};
pub use types::{
    ApproveInput, AuditEvent, CertificateRecord, CertificateStatus, ContentAddress,
    LedgerReference, LifecycleAction, RejectInput, RequestInput, RevocationRecord, RevokeInput,
    VerificationStatus,
};
pub use verifier::{DocumentCheck, LedgerCheck, VerificationResult, Verifier};

/// A lifecycle controller and a verifier sharing one store and one set of
/// adapters.
pub struct Registry {
    pub lifecycle: LifecycleController,
    pub verifier: Verifier,
}

impl Registry {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerAdapter>,
        content: Arc<dyn ContentStore>,
        settings: LifecycleSettings,
    ) -> Self {
        let verifier = Verifier::new(store.clone(), ledger.clone(), content.clone())
            .with_adapter_timeout(settings.adapter_timeout);
        let lifecycle = LifecycleController::new(store, ledger, content).with_settings(settings);
        Self {
            lifecycle,
            verifier,
        }
    }

    /// Open the configured store and construct the configured adapters.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let store = Arc::new(SqliteRecordStore::new(&config.store.path)?);
        Ok(Self::new(
            store,
            config.build_ledger()?,
            config.build_content_store()?,
            config.settings(),
        ))
    }
}
