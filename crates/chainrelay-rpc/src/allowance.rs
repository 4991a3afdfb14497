//! Read-only allowance lookup via `eth_call`.
//!
//! Calldata is `selector ‖ abi_encode(child)`; the node returns one ABI word
//! holding the allowance in the smallest unit.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::Function;
use alloy_primitives::{Address, U256};
use chainrelay_core::units::format_ether;
use serde_json::json;
use tracing::debug;

use crate::error::CallError;
use crate::request::JsonRpcRequest;
use crate::transport::{self, RpcTransport};

/// Getter used when no other function is configured.
pub const DEFAULT_ALLOWANCE_FUNCTION: &str =
    "function getAllowance(address child) view returns (uint256)";

/// Reads a recipient's current allowance from the contract.
pub struct AllowanceReader {
    transport: Arc<dyn RpcTransport>,
    contract: Address,
    selector: [u8; 4],
    next_id: AtomicU64,
}

impl std::fmt::Debug for AllowanceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowanceReader")
            .field("endpoint", &self.transport.url())
            .field("contract", &self.contract)
            .finish()
    }
}

impl AllowanceReader {
    /// Reader for `getAllowance(address) returns (uint256)` on `contract`.
    pub fn new(transport: Arc<dyn RpcTransport>, contract: &str) -> Result<Self, CallError> {
        Self::with_function(transport, contract, DEFAULT_ALLOWANCE_FUNCTION)
    }

    /// Reader for any `(address) returns (uint*)` getter.
    pub fn with_function(
        transport: Arc<dyn RpcTransport>,
        contract: &str,
        function: &str,
    ) -> Result<Self, CallError> {
        let func = Function::parse(function).map_err(|e| CallError::InvalidFunction {
            reason: e.to_string(),
        })?;
        let takes_address = func.inputs.len() == 1 && func.inputs[0].ty == "address";
        let returns_uint = func.outputs.len() == 1 && func.outputs[0].ty.starts_with("uint");
        if !takes_address || !returns_uint {
            return Err(CallError::InvalidFunction {
                reason: format!("{} must take one address and return one uint", func.signature()),
            });
        }

        Ok(Self {
            transport,
            contract: parse_address(contract)?,
            selector: func.selector().0,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Current allowance of `child` in the smallest unit.
    pub async fn allowance_of(&self, child: &str) -> Result<U256, CallError> {
        let child = parse_address(child)?;
        let call = json!({
            "to": self.contract.to_checksum(None),
            "data": self.calldata(child),
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::eth_call(id, call, "latest");
        let result: String = transport::call(self.transport.as_ref(), req).await?;
        debug!(child = %child, result = %result, "eth_call returned");

        decode_uint(&result)
    }

    /// Current allowance of `child` as an ether decimal string.
    pub async fn allowance_eth(&self, child: &str) -> Result<String, CallError> {
        self.allowance_of(child).await.map(format_ether)
    }

    fn calldata(&self, child: Address) -> String {
        let mut data = self.selector.to_vec();
        data.extend_from_slice(&DynSolValue::Address(child).abi_encode());
        format!("0x{}", hex::encode(data))
    }
}

fn parse_address(input: &str) -> Result<Address, CallError> {
    Address::from_str(input.trim()).map_err(|_| CallError::InvalidAddress {
        input: input.to_string(),
    })
}

fn decode_uint(result: &str) -> Result<U256, CallError> {
    let bytes = hex::decode(result.strip_prefix("0x").unwrap_or(result)).map_err(|e| {
        CallError::Decode {
            reason: format!("invalid hex: {e}"),
        }
    })?;
    if bytes.is_empty() {
        return Err(CallError::Decode {
            reason: "empty result (no contract code at address?)".into(),
        });
    }
    match DynSolType::Uint(256).abi_decode(&bytes) {
        Ok(DynSolValue::Uint(value, _)) => Ok(value),
        Ok(other) => Err(CallError::Decode {
            reason: format!("expected uint256, got {other:?}"),
        }),
        Err(e) => Err(CallError::Decode {
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::request::JsonRpcResponse;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const CHILD: &str = "0xab5801a7d398351b8be11c439e05c5b3259aec9b";

    /// Answers every request with a fixed result and records what it saw.
    struct FixedTransport {
        result: Value,
        seen: Mutex<Vec<JsonRpcRequest>>,
    }

    impl FixedTransport {
        fn new(result: Value) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RpcTransport for FixedTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let id = req.id;
            self.seen.lock().unwrap().push(req);
            Ok(JsonRpcResponse::success(id, self.result.clone()))
        }

        fn url(&self) -> &str {
            "mock://rpc"
        }
    }

    fn word(v: U256) -> Value {
        Value::String(format!("0x{}", hex::encode(v.to_be_bytes::<32>())))
    }

    #[tokio::test]
    async fn reads_and_formats_allowance() {
        let transport = FixedTransport::new(word(U256::from(2_500_000_000_000_000_000u64)));
        let reader = AllowanceReader::new(transport.clone(), CONTRACT).unwrap();

        assert_eq!(reader.allowance_eth(CHILD).await.unwrap(), "2.5");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "eth_call");
        assert_eq!(seen[0].params[1], "latest");
        let data = seen[0].params[0]["data"].as_str().unwrap();
        // 4-byte selector + one 32-byte word
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.ends_with(CHILD.trim_start_matches("0x")));
        assert_eq!(
            seen[0].params[0]["to"].as_str().unwrap().to_lowercase(),
            CONTRACT
        );
    }

    #[tokio::test]
    async fn bad_child_address_is_rejected_before_calling() {
        let transport = FixedTransport::new(word(U256::ZERO));
        let reader = AllowanceReader::new(transport.clone(), CONTRACT).unwrap();
        assert!(matches!(
            reader.allowance_of("not-an-address").await,
            Err(CallError::InvalidAddress { .. })
        ));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_result_is_a_decode_error() {
        let reader = AllowanceReader::new(FixedTransport::new(json!("0x")), CONTRACT).unwrap();
        assert!(matches!(
            reader.allowance_of(CHILD).await,
            Err(CallError::Decode { .. })
        ));
    }

    #[test]
    fn getter_shape_is_checked() {
        let transport = FixedTransport::new(Value::Null);
        assert!(matches!(
            AllowanceReader::with_function(
                transport,
                CONTRACT,
                "function balanceOf(address a, address b) view returns (uint256)"
            ),
            Err(CallError::InvalidFunction { .. })
        ));
    }

    #[test]
    fn selector_matches_keccak_prefix() {
        let func = Function::parse(DEFAULT_ALLOWANCE_FUNCTION).unwrap();
        assert_eq!(func.signature(), "getAllowance(address)");
        let reader = AllowanceReader::new(FixedTransport::new(Value::Null), CONTRACT).unwrap();
        assert_eq!(reader.selector, func.selector().0);
    }
}
