//! Transport-level and contract-call error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors from sending one JSON-RPC request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to RPC endpoint failed: {0}")]
    Connect(String),

    /// Non-2xx HTTP status from the endpoint.
    #[error("RPC endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Error object returned by the node itself.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: String },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Connection failures, timeouts, rate limiting and 5xx are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from a read-only contract call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Invalid function signature: {reason}")]
    InvalidFunction { reason: String },

    #[error("Invalid address: {input:?}")]
    InvalidAddress { input: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Could not decode call result: {reason}")]
    Decode { reason: String },
}
