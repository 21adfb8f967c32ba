//! TOML configuration for the certificate registry.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    ContentStore, EthRpcLedger, EthRpcLedgerConfig, IpfsContentStore, LedgerAdapter,
    CONTENT_STORE, LEDGER,
};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleSettings;

/// Top-level configuration.
///
/// Both adapters must point at durable services: every CLI invocation is a
/// separate process, so an in-process ledger would forget its anchors on exit.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub content_store: ContentStoreConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub issue: IssueConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file. Created on first use.
    pub path: PathBuf,
}

/// EVM certificate-registry contract.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub registry_contract: Address,
    /// Environment variable holding the hex private key that signs anchoring
    /// transactions.
    pub private_key_env: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentStoreConfig {
    /// IPFS HTTP API base URL, e.g. `http://127.0.0.1:5001`.
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Upper bound on every ledger and content-store call.
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: default_adapter_timeout_ms(),
        }
    }
}

fn default_adapter_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueConfig {
    /// Seconds after which an unfinished issue attempt may be taken over.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: default_claim_ttl_secs(),
        }
    }
}

fn default_claim_ttl_secs() -> u64 {
    300
}

impl RegistryConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| Error::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read config file: {e}")))?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.store.path.as_os_str().is_empty() {
            return Err(Error::Config("store.path must not be empty".into()));
        }
        if self.ledger.rpc_url.trim().is_empty() {
            return Err(Error::Config("ledger.rpc_url must not be empty".into()));
        }
        if self.ledger.registry_contract == Address::ZERO {
            return Err(Error::Config(
                "ledger.registry_contract must not be the zero address".into(),
            ));
        }
        if self.ledger.private_key_env.trim().is_empty() {
            return Err(Error::Config("ledger.private_key_env must not be empty".into()));
        }
        if self.content_store.api_url.trim().is_empty() {
            return Err(Error::Config("content_store.api_url must not be empty".into()));
        }
        if self.timeouts.adapter_timeout_ms == 0 {
            return Err(Error::Config(
                "timeouts.adapter_timeout_ms must be greater than 0".into(),
            ));
        }
        // A takeover must not happen while the holder can still be waiting on
        // its ledger lookup and submission.
        let settings = self.settings();
        if settings.claim_ttl < settings.adapter_timeout.saturating_mul(2) {
            return Err(Error::Config(format!(
                "issue.claim_ttl_secs ({}) must be at least twice timeouts.adapter_timeout_ms ({})",
                self.issue.claim_ttl_secs, self.timeouts.adapter_timeout_ms
            )));
        }
        Ok(())
    }

    /// Resolve the ledger signer private key from the environment variable.
    pub fn resolve_private_key(&self) -> Result<String> {
        let env_name = &self.ledger.private_key_env;
        std::env::var(env_name).map_err(|e| {
            Error::Config(format!(
                "Cannot read private key from env var {env_name}: {e}"
            ))
        })
    }

    pub fn settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            adapter_timeout: Duration::from_millis(self.timeouts.adapter_timeout_ms),
            claim_ttl: Duration::from_secs(self.issue.claim_ttl_secs),
        }
    }

    pub fn build_ledger(&self) -> Result<Arc<dyn LedgerAdapter>> {
        let signer: PrivateKeySigner = self
            .resolve_private_key()?
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid ledger private key: {e}")))?;
        let ledger = EthRpcLedger::new(
            &EthRpcLedgerConfig {
                rpc_url: self.ledger.rpc_url.clone(),
                registry_contract: self.ledger.registry_contract,
            },
            signer,
        )
        .map_err(|e| Error::from_adapter(LEDGER, e))?;
        Ok(Arc::new(ledger))
    }

    pub fn build_content_store(&self) -> Result<Arc<dyn ContentStore>> {
        let store = IpfsContentStore::new(&self.content_store.api_url)
            .map_err(|e| Error::from_adapter(CONTENT_STORE, e))?;
        Ok(Arc::new(store))
    }
}
