//! Content store backed by a self-hosted IPFS node's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{AdapterError, AdapterResult, ContentStore};
use crate::types::ContentAddress;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `/api/v0/add` response.
#[derive(Debug, Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// IPFS HTTP API client (`/api/v0/add`, `/api/v0/cat`).
pub struct IpfsContentStore {
    api_url: String,
    http: reqwest::Client,
}

impl IpfsContentStore {
    pub fn new(api_url: &str) -> AdapterResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::Unavailable(format!("failed to build IPFS HTTP client: {e}")))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

fn transport_error(op: &str, e: reqwest::Error) -> AdapterError {
    AdapterError::Unavailable(format!("IPFS {op} request failed: {e}"))
}

/// Server errors are worth retrying, client errors are not.
fn status_error(op: &str, status: StatusCode, body: &str) -> AdapterError {
    if status.is_server_error() {
        AdapterError::Unavailable(format!("IPFS {op} failed (HTTP {status}): {body}"))
    } else {
        AdapterError::Rejected(format!("IPFS {op} failed (HTTP {status}): {body}"))
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, bytes: &[u8]) -> AdapterResult<ContentAddress> {
        let url = format!("{}/api/v0/add?pin=true", self.api_url);
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("certificate");
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("add", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error("add", status, &text));
        }

        let added: IpfsAddResponse = resp
            .json()
            .await
            .map_err(|e| AdapterError::Rejected(format!("invalid IPFS add response: {e}")))?;
        if added.hash.is_empty() {
            return Err(AdapterError::Rejected("IPFS add returned an empty CID".into()));
        }

        tracing::debug!(cid = %added.hash, size = bytes.len(), "Stored document in IPFS");
        Ok(ContentAddress(added.hash))
    }

    async fn get(&self, address: &ContentAddress) -> AdapterResult<Vec<u8>> {
        let cid = address.0.trim().trim_start_matches("/ipfs/");
        if cid.is_empty() {
            return Err(AdapterError::Rejected("IPFS CID is empty".into()));
        }

        let url = format!("{}/api/v0/cat", self.api_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| transport_error("cat", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            // Kubo reports unknown blocks as a 500 with a "not found" message.
            if text.to_ascii_lowercase().contains("not found") {
                return Err(AdapterError::NotFound(cid.to_string()));
            }
            return Err(status_error("cat", status, &text));
        }

        let bytes = resp.bytes().await.map_err(|e| transport_error("cat", e))?;
        Ok(bytes.to_vec())
    }
}
