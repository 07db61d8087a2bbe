//! HTTP chain source backed by `reqwest`.
//!
//! The node exposes one endpoint; each call is a form `POST` naming an
//! `action`. Transient transport failures are retried with exponential
//! backoff before the error reaches the scanner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use chainscan_core::error::ScanError;
use chainscan_core::source::ChainSource;
use chainscan_core::types::{Block, Transaction};

use crate::error::NodeError;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::wire;

/// Configuration for `HttpChainSource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node API endpoint.
    pub server_api: String,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_api: "http://127.0.0.1:8080/api".into(),
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

/// [`ChainSource`] over the node's action API.
pub struct HttpChainSource {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpChainSource {
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| NodeError::Http(e.to_string()))?;

        Ok(Self {
            url: config.server_api,
            http,
            retry: RetryPolicy::new(config.retry),
        })
    }

    async fn send_once(&self, params: &[(&str, String)]) -> Result<Value, NodeError> {
        let resp = self
            .http
            .post(&self.url)
            .form(params)
            .send()
            .await
            .map_err(|e| NodeError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(NodeError::Status { status, body });
        }

        let body = resp
            .json::<Value>()
            .await
            .map_err(|e| NodeError::Decode(e.to_string()))?;
        wire::check_error(&body)?;
        Ok(body)
    }

    /// Call `action` with extra form parameters, retrying transient failures.
    pub async fn call(&self, action: &str, extra: &[(&str, String)]) -> Result<Value, NodeError> {
        let mut params = Vec::with_capacity(extra.len() + 1);
        params.push(("action", action.to_string()));
        params.extend(extra.iter().cloned());

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&params).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => match self.retry.delay_before(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            action,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying node request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(action, attempt, error = %e, url = %self.url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn current_height(&self) -> Result<u64, ScanError> {
        let body = self.call("GetBlockHeight", &[]).await?;
        Ok(wire::parse_height(body)?)
    }

    async fn block_at(&self, height: u64) -> Result<Block, ScanError> {
        let body = self
            .call("GetTransactionRecordHight", &[("height", height.to_string())])
            .await?;
        Ok(wire::parse_block(height, body)?)
    }

    async fn transaction_by_id(&self, tx_id: &str) -> Result<Transaction, ScanError> {
        let body = self
            .call("GetTransactionRecordHash", &[("hash", tx_id.to_string())])
            .await?;
        Ok(wire::parse_transaction(tx_id, body)?)
    }

    async fn balance_of(&self, address: &str) -> Result<String, ScanError> {
        let body = self
            .call("GetAssetBalanceAds", &[("tokenaddress", address.to_string())])
            .await?;
        Ok(wire::parse_balance(body)?)
    }
}
