// src/chain.rs
// Minimal blockchain node interface: broadcast a data-carrying transaction,
// read a known transaction's confirmation depth.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain node unreachable: {0}")]
    Unreachable(String),

    #[error("chain call timed out")]
    Timeout,

    #[error("chain node rejected the request: {0}")]
    Rejected(String),

    /// Persistent misconfiguration (bad endpoint, missing signing account).
    /// Fatal to the stamper loop; everything above is transient.
    #[error("chain client configuration error: {0}")]
    Config(String),
}

impl ChainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Config(_))
    }
}

/// The two chain operations the stamper needs. Everything else about the
/// node stays behind its RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a transaction carrying `payload` in its data field.
    /// Returns the transaction identifier.
    async fn broadcast(&self, payload: &[u8]) -> Result<String, ChainError>;

    /// Confirmation depth of a known transaction; `Ok(None)` when the node
    /// no longer knows the transaction at all.
    async fn confirmations(&self, txid: &str) -> Result<Option<u64>, ChainError>;
}

/// JSON-RPC 2.0 client for the external chain node.
pub struct RpcChainClient {
    client: Client,
    url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcChainClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ChainError::Config(format!(
                "chain RPC url must be http(s), got '{}'",
                url
            )));
        }
        Ok(Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<RpcResponse, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout
                } else {
                    ChainError::Unreachable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("{} - {}", status, txt)));
        }

        resp.json::<RpcResponse>()
            .await
            .map_err(|e| ChainError::Rejected(format!("malformed RPC response: {}", e)))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn broadcast(&self, payload: &[u8]) -> Result<String, ChainError> {
        let resp = self
            .call("broadcastdata", json!([hex::encode(payload)]))
            .await?;

        if let Some(err) = resp.error {
            return Err(ChainError::Rejected(format!(
                "broadcastdata failed ({}): {}",
                err.code, err.message
            )));
        }

        match resp.result {
            Some(serde_json::Value::String(txid)) => Ok(txid),
            other => Err(ChainError::Rejected(format!(
                "broadcastdata returned no txid: {:?}",
                other
            ))),
        }
    }

    async fn confirmations(&self, txid: &str) -> Result<Option<u64>, ChainError> {
        let resp = self.call("confirmationdepth", json!([txid])).await?;

        if let Some(err) = resp.error {
            return Err(ChainError::Rejected(format!(
                "confirmationdepth failed ({}): {}",
                err.code, err.message
            )));
        }

        match resp.result {
            // null means the node no longer knows the transaction
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ChainError::Rejected(format!("bad depth value: {}", n))),
            Some(other) => Err(ChainError::Rejected(format!(
                "confirmationdepth returned non-numeric value: {}",
                other
            ))),
        }
    }
}
