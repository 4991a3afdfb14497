//! `reqwest`-backed JSON-RPC transport.
//!
//! Transient failures are retried with exponential backoff from
//! [`RetryPolicy::next_delay`]; node errors and 4xx come back on the first try.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainrelay_core::RetryPolicy;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{self, RpcTransport};

/// Longest error body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryPolicy,
    /// Per-attempt timeout, covering connect through body.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// JSON-RPC over HTTP POST.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    policy: RetryPolicy,
    timeout_ms: u64,
    ids: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("HTTP client setup: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            policy: config.retry,
            timeout_ms: config.request_timeout.as_millis() as u64,
            ids: AtomicU64::new(1),
        })
    }

    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    /// Call `method` with a fresh request id and deserialize the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        transport::call(self, JsonRpcRequest::new(id, method, params)).await
    }

    async fn post(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout { ms: self.timeout_ms }
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.post(&req).await {
                Ok(resp) => {
                    debug!(method = %req.method, id = req.id, attempt, "rpc ok");
                    return Ok(resp);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt) else {
                error!(method = %req.method, attempts = attempt, error = %err, "rpc failed, giving up");
                return Err(err);
            };
            warn!(
                method = %req.method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "rpc failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}
