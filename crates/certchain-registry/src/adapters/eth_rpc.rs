//! Ledger adapter for the EVM certificate-registry contract, via alloy.
//!
//! Anchoring calls `issueCertificate` and waits for the receipt, so a
//! reverted transaction never becomes a ledger reference. The contract's
//! student and IPFS slots are left empty; the registry keeps the document
//! address and the subject itself.

use alloy::consensus::Transaction as _;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy::transports::TransportError;
use async_trait::async_trait;
use certchain_core::{Fingerprint, Hash};

use super::{AdapterError, AdapterResult, LedgerAdapter, LedgerQuery, LedgerRecord};
use crate::types::LedgerReference;

sol! {
    #[sol(rpc)]
    contract CertificateRegistry {
        function issueCertificate(address studentAddress, bytes32 certificateHash, string ipfsHash) external;
        function verifyCertificate(bytes32 certificateHash) external view returns (bool isValid, address issuer, uint256 timestamp);
        function revokeCertificate(bytes32 certificateHash) external;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthRpcLedgerConfig {
    /// JSON-RPC endpoint, e.g. `http://127.0.0.1:7545`.
    pub rpc_url: String,
    pub registry_contract: Address,
}

pub struct EthRpcLedger {
    provider: DynProvider,
    contract: CertificateRegistry::CertificateRegistryInstance<DynProvider>,
    registry_contract: Address,
}

impl EthRpcLedger {
    /// Build a client that signs anchoring transactions with `signer`.
    pub fn new(config: &EthRpcLedgerConfig, signer: PrivateKeySigner) -> AdapterResult<Self> {
        let url: reqwest::Url = config
            .rpc_url
            .parse()
            .map_err(|e| AdapterError::Rejected(format!("invalid RPC URL {:?}: {e}", config.rpc_url)))?;

        tracing::debug!(
            rpc_url = %config.rpc_url,
            contract = %config.registry_contract,
            signer = %signer.address(),
            "Connecting to certificate registry contract"
        );

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        let contract = CertificateRegistry::new(config.registry_contract, provider.clone());
        Ok(Self {
            provider,
            contract,
            registry_contract: config.registry_contract,
        })
    }

    async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> AdapterResult<LedgerRecord> {
        let found = self
            .contract
            .verifyCertificate(certificate_hash(fingerprint))
            .call()
            .await
            .map_err(|e| contract_error("verifyCertificate", e))?;

        // The contract reports a zero issuer for hashes it never stored.
        if found.issuer == Address::ZERO {
            return Ok(LedgerRecord::absent());
        }
        Ok(LedgerRecord {
            anchored: true,
            fingerprint: Some(*fingerprint),
            submitter_address: Some(found.issuer.to_string()),
            timestamp: i64::try_from(found.timestamp).ok(),
            revoked: !found.isValid,
            ..LedgerRecord::default()
        })
    }

    async fn lookup_by_reference(&self, reference: &LedgerReference) -> AdapterResult<LedgerRecord> {
        let tx_hash: B256 = reference
            .0
            .parse()
            .map_err(|e| AdapterError::Rejected(format!("invalid transaction hash {reference}: {e}")))?;

        let Some(tx) = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(|e| rpc_error("eth_getTransactionByHash", e))?
        else {
            return Ok(LedgerRecord::absent());
        };
        if tx.to() != Some(self.registry_contract) {
            tracing::debug!(reference = %reference, "Transaction is not addressed to the registry contract");
            return Ok(LedgerRecord::absent());
        }
        let Some(fingerprint) = anchored_fingerprint(tx.input()) else {
            tracing::debug!(reference = %reference, "Transaction is not an issueCertificate call");
            return Ok(LedgerRecord::absent());
        };

        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| rpc_error("eth_getTransactionReceipt", e))?
            .ok_or_else(|| AdapterError::Unavailable(format!("transaction {tx_hash} is not mined yet")))?;
        if !receipt.status() {
            tracing::debug!(reference = %reference, "Anchoring transaction reverted");
            return Ok(LedgerRecord::absent());
        }

        let mut record = self.lookup_by_fingerprint(&fingerprint).await?;
        if record.anchored {
            record.reference = Some(reference.clone());
            record.block_number = receipt.block_number;
        }
        Ok(record)
    }
}

#[async_trait]
impl LedgerAdapter for EthRpcLedger {
    async fn submit(&self, fingerprint: &Fingerprint) -> AdapterResult<LedgerReference> {
        let pending = self
            .contract
            .issueCertificate(Address::ZERO, certificate_hash(fingerprint), String::new())
            .send()
            .await
            .map_err(|e| contract_error("issueCertificate", e))?;
        let tx_hash = *pending.tx_hash();

        let receipt = pending.get_receipt().await.map_err(|e| {
            AdapterError::Unavailable(format!("issueCertificate {tx_hash} not confirmed: {e}"))
        })?;
        if !receipt.status() {
            return Err(AdapterError::Rejected(format!(
                "issueCertificate {tx_hash} reverted"
            )));
        }

        tracing::info!(
            fingerprint = %fingerprint,
            tx_hash = %tx_hash,
            block_number = receipt.block_number,
            contract = %self.registry_contract,
            "Anchored certificate"
        );
        Ok(LedgerReference(tx_hash.to_string()))
    }

    async fn lookup(&self, query: &LedgerQuery) -> AdapterResult<LedgerRecord> {
        match query {
            LedgerQuery::ByFingerprint(fp) => self.lookup_by_fingerprint(fp).await,
            LedgerQuery::ByReference(reference) => self.lookup_by_reference(reference).await,
        }
    }

    async fn revoke(
        &self,
        fingerprint: &Fingerprint,
        _reference: &LedgerReference,
    ) -> AdapterResult<Option<LedgerReference>> {
        let pending = self
            .contract
            .revokeCertificate(certificate_hash(fingerprint))
            .send()
            .await
            .map_err(|e| contract_error("revokeCertificate", e))?;
        let tx_hash = *pending.tx_hash();

        let receipt = pending.get_receipt().await.map_err(|e| {
            AdapterError::Unavailable(format!("revokeCertificate {tx_hash} not confirmed: {e}"))
        })?;
        if !receipt.status() {
            return Err(AdapterError::Rejected(format!(
                "revokeCertificate {tx_hash} reverted"
            )));
        }

        tracing::info!(fingerprint = %fingerprint, tx_hash = %tx_hash, "Revoked certificate on ledger");
        Ok(Some(LedgerReference(tx_hash.to_string())))
    }
}

fn certificate_hash(fingerprint: &Fingerprint) -> B256 {
    B256::from(*fingerprint.as_hash().as_bytes())
}

/// Fingerprint carried by `issueCertificate` calldata.
fn anchored_fingerprint(input: &[u8]) -> Option<Fingerprint> {
    let call = CertificateRegistry::issueCertificateCall::abi_decode(input).ok()?;
    Some(Fingerprint::from(Hash::from_bytes(call.certificateHash.0)))
}

/// An error response from the node is a refusal; anything else is transport.
fn rpc_error(method: &str, err: TransportError) -> AdapterError {
    if err.is_error_resp() {
        AdapterError::Rejected(format!("{method}: {err}"))
    } else {
        AdapterError::Unavailable(format!("{method}: {err}"))
    }
}

fn contract_error(call: &str, err: alloy::contract::Error) -> AdapterError {
    match err {
        alloy::contract::Error::TransportError(e) => rpc_error(call, e),
        other => AdapterError::Rejected(format!("{call}: {other}")),
    }
}
