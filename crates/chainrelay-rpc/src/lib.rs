//! chainrelay-rpc: JSON-RPC over HTTP for read-only contract calls.
//!
//! - [`RpcTransport`]: async transport trait (object-safe)
//! - [`HttpRpcClient`]: `reqwest` transport with retry on transient errors
//! - [`AllowanceReader`]: `getAllowance(address)` via `eth_call`
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types

pub mod allowance;
pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use allowance::{AllowanceReader, DEFAULT_ALLOWANCE_FUNCTION};
pub use client::{HttpClientConfig, HttpRpcClient};
pub use error::{CallError, TransportError};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use transport::{call, RpcTransport};
