//! Error types for the ChainRelay ingest pipeline.

use thiserror::Error;

/// Errors from converting between smallest-unit integers and ether decimals.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Invalid decimal amount: {input:?}")]
    InvalidDecimal { input: String },

    #[error("Too many fractional digits in {input:?} (max 18)")]
    TooPrecise { input: String },

    #[error("Amount overflows 256 bits: {input:?}")]
    Overflow { input: String },
}

/// Errors that can occur while decoding a single log into a record.
/// None of these are fatal to the subscription.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid event signature: {reason}")]
    InvalidSignature { reason: String },

    #[error("Event has no parameter named '{name}'")]
    UnknownField { name: String },

    #[error("Field '{field}' must be of type {expected}, found {found}")]
    UnexpectedType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Unexpected event signature {topic}")]
    UnexpectedSignature { topic: String },

    #[error("Malformed log: {reason}")]
    Malformed { reason: String },

    #[error("ABI decode failed: {reason}")]
    AbiDecodeFailed { reason: String },
}

/// Errors from the event stream connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("RPC connection failed: {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Subscription rejected by node: {reason}")]
    SubscribeRejected { reason: String },

    #[error("Stream closed unexpectedly")]
    Closed,

    #[error("No traffic from node for {ms}ms")]
    Idle { ms: u64 },

    #[error("{0}")]
    Other(String),
}
