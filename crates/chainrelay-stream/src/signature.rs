//! Event signature parsing and topic0 computation.
//!
//! The topic0 of an EVM event is the keccak256 hash of its canonical
//! signature string, e.g.:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use alloy_json_abi::{Event, EventParam};
use chainrelay_core::DecodeError;
use tiny_keccak::{Hasher, Keccak};

/// The event consumed when no other signature is configured.
pub const DEFAULT_EVENT_SIGNATURE: &str =
    "event AllowanceSet(address indexed parent, address indexed child, uint256 amount)";

/// Compute the keccak256 topic0 of a canonical signature such as
/// `"AllowanceSet(address,address,uint256)"`. Lower-case, `0x`-prefixed.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// A parsed, non-anonymous event declaration.
#[derive(Debug, Clone)]
pub struct EventSignature {
    event: Event,
    topic0: String,
}

impl EventSignature {
    /// Parse a human-readable declaration,
    /// e.g. `event AllowanceSet(address indexed parent, address indexed child, uint256 amount)`.
    pub fn parse(declaration: &str) -> Result<Self, DecodeError> {
        let event = Event::parse(declaration).map_err(|e| DecodeError::InvalidSignature {
            reason: e.to_string(),
        })?;
        if event.anonymous {
            return Err(DecodeError::InvalidSignature {
                reason: "anonymous events have no topic0 to subscribe to".into(),
            });
        }
        let topic0 = keccak256_signature(&event.signature());
        Ok(Self { event, topic0 })
    }

    /// Event name, e.g. `AllowanceSet`.
    pub fn name(&self) -> &str {
        &self.event.name
    }

    /// Canonical signature, e.g. `AllowanceSet(address,address,uint256)`.
    pub fn canonical(&self) -> String {
        self.event.signature()
    }

    /// keccak256 of the canonical signature.
    pub fn topic0(&self) -> &str {
        &self.topic0
    }

    pub fn inputs(&self) -> &[EventParam] {
        &self.event.inputs
    }

    /// Number of indexed parameters (topics after topic0).
    pub fn indexed_count(&self) -> usize {
        self.event.inputs.iter().filter(|p| p.indexed).count()
    }
}
