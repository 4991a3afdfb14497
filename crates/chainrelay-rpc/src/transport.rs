//! The `RpcTransport` seam and a typed `call` on top of it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Sends JSON-RPC requests somewhere. Stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint identifier for logs.
    fn url(&self) -> &str;
}

/// Send `req`, check the response belongs to it and deserialize the result.
pub async fn call<T: DeserializeOwned>(
    transport: &dyn RpcTransport,
    req: JsonRpcRequest,
) -> Result<T, TransportError> {
    let id = req.id;
    let resp = transport.send(req).await?;
    if !resp.answers(id) {
        return Err(TransportError::IdMismatch {
            expected: id,
            got: resp.id.to_string(),
        });
    }
    let result = resp.into_result().map_err(TransportError::Rpc)?;
    Ok(serde_json::from_value(result)?)
}
