//! `AllowanceDecoder`: turns a raw log notification into a [`Record`].
//!
//! # EVM log layout
//! - `topics[0]`: keccak256 of the event signature
//! - `topics[1..]`: indexed parameters, each a 32-byte ABI word
//! - `data`: non-indexed parameters, ABI-encoded as a tuple
//!
//! Only the three logical fields (origin, recipient, amount) are extracted.
//! Which parameter plays which role is configured by name.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use chainrelay_core::{DecodeError, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signature::EventSignature;

/// A raw EVM log as carried by an `eth_subscription` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default = "empty_data")]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

fn empty_data() -> String {
    "0x".into()
}

impl RawLog {
    /// Parse the `params.result` object of a log notification.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Block number, if present and well-formed.
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_hex_u64)
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

/// Where a logical field lives inside a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Index into `topics` (1-based, topic0 is the signature).
    Topic(usize),
    /// Position inside the decoded data tuple.
    Data(usize),
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    slot: Slot,
    ty: DynSolType,
}

/// The fields of one decoded allowance event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAllowance {
    pub origin: String,
    pub recipient: String,
    pub amount_wei: U256,
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

impl DecodedAllowance {
    /// Build the immutable record, stamped with the local ingestion time.
    pub fn into_record(self, observed_at: DateTime<Utc>) -> Record {
        Record::new(
            self.origin,
            self.recipient,
            self.amount_wei,
            observed_at,
            self.tx_hash,
        )
    }
}

/// Decoder for one configured event signature.
/// Cheap to clone; holds no mutable state.
#[derive(Debug, Clone)]
pub struct AllowanceDecoder {
    signature: EventSignature,
    data_types: Vec<DynSolType>,
    origin: FieldSpec,
    recipient: FieldSpec,
    amount: FieldSpec,
}

impl AllowanceDecoder {
    /// Build a decoder for `signature`, taking the origin, recipient and
    /// amount from the parameters with the given names.
    pub fn new(
        signature: EventSignature,
        origin_field: &str,
        recipient_field: &str,
        amount_field: &str,
    ) -> Result<Self, DecodeError> {
        let mut data_types = Vec::new();
        let mut specs = Vec::new();
        let mut topic = 0usize;

        for param in signature.inputs() {
            let ty = DynSolType::parse(&param.ty).map_err(|e| DecodeError::InvalidSignature {
                reason: format!("parameter '{}': {e}", param.name),
            })?;
            let slot = if param.indexed {
                topic += 1;
                Slot::Topic(topic)
            } else {
                data_types.push(ty.clone());
                Slot::Data(data_types.len() - 1)
            };
            specs.push(FieldSpec {
                name: param.name.clone(),
                slot,
                ty,
            });
        }

        let find = |name: &str| -> Result<FieldSpec, DecodeError> {
            specs
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| DecodeError::UnknownField { name: name.into() })
        };

        let origin = find(origin_field)?;
        let recipient = find(recipient_field)?;
        let amount = find(amount_field)?;

        expect_type(&origin, "address", |t| matches!(t, DynSolType::Address))?;
        expect_type(&recipient, "address", |t| matches!(t, DynSolType::Address))?;
        expect_type(&amount, "uint", |t| matches!(t, DynSolType::Uint(_)))?;

        Ok(Self {
            signature,
            data_types,
            origin,
            recipient,
            amount,
        })
    }

    /// Decoder for the default `AllowanceSet(parent, child, amount)` event.
    pub fn allowance_set() -> Result<Self, DecodeError> {
        let signature = EventSignature::parse(crate::signature::DEFAULT_EVENT_SIGNATURE)?;
        Self::new(signature, "parent", "child", "amount")
    }

    pub fn signature(&self) -> &EventSignature {
        &self.signature
    }

    /// The `eth_subscribe("logs", ...)` filter for `contract`.
    pub fn log_filter(&self, contract: &str) -> Value {
        serde_json::json!({
            "address": contract,
            "topics": [self.signature.topic0()],
        })
    }

    /// Decode one log into its logical fields.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedAllowance, DecodeError> {
        let topic0 = log.topics.first().ok_or_else(|| DecodeError::Malformed {
            reason: "log has no topics".into(),
        })?;
        if !topic0.eq_ignore_ascii_case(self.signature.topic0()) {
            return Err(DecodeError::UnexpectedSignature {
                topic: topic0.clone(),
            });
        }
        let expected_topics = 1 + self.signature.indexed_count();
        if log.topics.len() != expected_topics {
            return Err(DecodeError::Malformed {
                reason: format!(
                    "expected {expected_topics} topics, got {}",
                    log.topics.len()
                ),
            });
        }

        let data = self.decode_data(&log.data)?;

        let origin = self.extract(&self.origin, log, &data)?;
        let recipient = self.extract(&self.recipient, log, &data)?;
        let amount = self.extract(&self.amount, log, &data)?;

        let tx_hash = log
            .transaction_hash
            .clone()
            .ok_or_else(|| DecodeError::Malformed {
                reason: "log has no transactionHash".into(),
            })?;

        Ok(DecodedAllowance {
            origin: as_address(&self.origin, origin)?,
            recipient: as_address(&self.recipient, recipient)?,
            amount_wei: as_uint(&self.amount, amount)?,
            tx_hash,
            block_number: log.block_number_u64(),
        })
    }

    /// Decode the non-indexed parameters.
    fn decode_data(&self, data_hex: &str) -> Result<Vec<DynSolValue>, DecodeError> {
        if self.data_types.is_empty() {
            return Ok(Vec::new());
        }
        let bytes = decode_hex(data_hex, "data")?;
        let tuple = DynSolType::Tuple(self.data_types.clone());
        match tuple.abi_decode_sequence(&bytes) {
            Ok(DynSolValue::Tuple(vals)) => Ok(vals),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(DecodeError::AbiDecodeFailed {
                reason: e.to_string(),
            }),
        }
    }

    fn extract(
        &self,
        field: &FieldSpec,
        log: &RawLog,
        data: &[DynSolValue],
    ) -> Result<DynSolValue, DecodeError> {
        match field.slot {
            Slot::Topic(i) => {
                let topic = &log.topics[i];
                let bytes = decode_hex(topic, &field.name)?;
                if bytes.len() != 32 {
                    return Err(DecodeError::Malformed {
                        reason: format!("topic for '{}' is {} bytes", field.name, bytes.len()),
                    });
                }
                field
                    .ty
                    .abi_decode(&bytes)
                    .map_err(|e| DecodeError::AbiDecodeFailed {
                        reason: format!("topic '{}': {e}", field.name),
                    })
            }
            Slot::Data(i) => data.get(i).cloned().ok_or_else(|| DecodeError::Malformed {
                reason: format!("data has no value for '{}'", field.name),
            }),
        }
    }
}

fn expect_type(
    field: &FieldSpec,
    expected: &str,
    ok: impl Fn(&DynSolType) -> bool,
) -> Result<(), DecodeError> {
    if ok(&field.ty) {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedType {
            field: field.name.clone(),
            expected: expected.into(),
            found: field.ty.sol_type_name().into_owned(),
        })
    }
}

fn as_address(field: &FieldSpec, value: DynSolValue) -> Result<String, DecodeError> {
    match value {
        DynSolValue::Address(a) => Ok(a.to_checksum(None)),
        other => Err(unexpected_value(field, "address", &other)),
    }
}

fn as_uint(field: &FieldSpec, value: DynSolValue) -> Result<U256, DecodeError> {
    match value {
        DynSolValue::Uint(u, _) => Ok(u),
        other => Err(unexpected_value(field, "uint", &other)),
    }
}

fn unexpected_value(field: &FieldSpec, expected: &str, got: &DynSolValue) -> DecodeError {
    DecodeError::UnexpectedType {
        field: field.name.clone(),
        expected: expected.into(),
        found: got
            .as_type()
            .map(|t| t.sol_type_name().into_owned())
            .unwrap_or_else(|| "unknown".into()),
    }
}

fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| DecodeError::Malformed {
        reason: format!("invalid hex in {what}: {e}"),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PARENT: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";
    pub(crate) const CHILD: &str = "0xab5801a7d398351b8be11c439e05c5b3259aec9b";

    pub(crate) fn topic_for(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    pub(crate) fn word(amount: U256) -> String {
        format!("0x{}", hex::encode(amount.to_be_bytes::<32>()))
    }

    pub(crate) fn allowance_log(decoder: &AllowanceDecoder, amount: U256, tx: &str) -> Value {
        serde_json::json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": [decoder.signature().topic0(), topic_for(PARENT), topic_for(CHILD)],
            "data": word(amount),
            "blockNumber": "0x1234",
            "transactionHash": tx,
            "logIndex": "0x0",
            "removed": false,
        })
    }

    #[test]
    fn decodes_allowance_set() {
        let decoder = AllowanceDecoder::allowance_set().unwrap();
        let amount = U256::from(1_000_000_000_000_000_000u64);
        let log = RawLog::from_value(allowance_log(&decoder, amount, "0xfeed")).unwrap();

        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.origin.to_lowercase(), PARENT);
        assert_eq!(decoded.recipient.to_lowercase(), CHILD);
        assert_eq!(decoded.amount_wei, amount);
        assert_eq!(decoded.tx_hash, "0xfeed");
        assert_eq!(decoded.block_number, Some(0x1234));

        let record = decoded.into_record(Utc::now());
        assert_eq!(record.amount_eth(), "1");
        assert_eq!(record.recipient_key().as_str(), CHILD);
    }

    #[test]
    fn all_params_in_data() {
        let sig = EventSignature::parse(
            "event AllowanceSet(address parent, address child, uint256 amount)",
        )
        .unwrap();
        let decoder = AllowanceDecoder::new(sig, "parent", "child", "amount").unwrap();
        let data = format!(
            "0x{}{}{}",
            topic_for(PARENT).trim_start_matches("0x"),
            topic_for(CHILD).trim_start_matches("0x"),
            word(U256::from(500_000_000_000_000_000u64)).trim_start_matches("0x"),
        );
        let log = RawLog::from_value(serde_json::json!({
            "address": "0x1",
            "topics": [decoder.signature().topic0()],
            "data": data,
            "transactionHash": "0xabc",
        }))
        .unwrap();

        let decoded = decoder.decode(&log).unwrap();
        assert_eq!(decoded.recipient.to_lowercase(), CHILD);
        assert_eq!(decoded.into_record(Utc::now()).amount_eth(), "0.5");
    }

    #[test]
    fn wrong_topic0_is_rejected() {
        let decoder = AllowanceDecoder::allowance_set().unwrap();
        let mut v = allowance_log(&decoder, U256::from(1u64), "0x1");
        v["topics"][0] =
            Value::String("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".into());
        let log = RawLog::from_value(v).unwrap();
        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::UnexpectedSignature { .. })
        ));
    }

    #[test]
    fn truncated_data_is_an_error_not_a_panic() {
        let decoder = AllowanceDecoder::allowance_set().unwrap();
        let mut v = allowance_log(&decoder, U256::from(1u64), "0x1");
        v["data"] = Value::String("0x01".into());
        let log = RawLog::from_value(v).unwrap();
        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::AbiDecodeFailed { .. })
        ));
    }

    #[test]
    fn missing_topic_is_malformed() {
        let decoder = AllowanceDecoder::allowance_set().unwrap();
        let mut v = allowance_log(&decoder, U256::from(1u64), "0x1");
        v["topics"].as_array_mut().unwrap().pop();
        let log = RawLog::from_value(v).unwrap();
        assert!(matches!(decoder.decode(&log), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            RawLog::from_value(serde_json::json!("0xdead")),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_field_name_rejected() {
        let sig = EventSignature::parse(crate::signature::DEFAULT_EVENT_SIGNATURE).unwrap();
        assert!(matches!(
            AllowanceDecoder::new(sig, "parent", "kid", "amount"),
            Err(DecodeError::UnknownField { .. })
        ));
    }

    #[test]
    fn amount_must_be_uint() {
        let sig =
            EventSignature::parse("event AllowanceSet(address indexed parent, address indexed child, bool amount)")
                .unwrap();
        assert!(matches!(
            AllowanceDecoder::new(sig, "parent", "child", "amount"),
            Err(DecodeError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn log_filter_targets_contract_and_topic0() {
        let decoder = AllowanceDecoder::allowance_set().unwrap();
        let filter = decoder.log_filter("0xc0ffee");
        assert_eq!(filter["address"], "0xc0ffee");
        assert_eq!(filter["topics"][0], decoder.signature().topic0());
    }
}
