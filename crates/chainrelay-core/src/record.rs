//! The normalized record type and its wire representations.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::units;

/// Canonical recipient identity used as the cache and broadcast key.
///
/// Construction always trims and lower-cases, so two spellings of the same
/// address (checksummed vs. lower-case) map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientKey(String);

impl RecipientKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecipientKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for RecipientKey {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&String> for RecipientKey {
    fn from(raw: &String) -> Self {
        Self::new(raw)
    }
}

impl From<&RecipientKey> for RecipientKey {
    fn from(key: &RecipientKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single observed allowance event.
///
/// Fields are private: a `Record` cannot be changed after construction and
/// is shared between the cache and live subscribers as `Arc<Record>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    counterpart_from: String,
    counterpart_to: String,
    amount_wei: U256,
    amount_eth: String,
    observed_at: DateTime<Utc>,
    external_ref: String,
}

impl Record {
    pub fn new(
        counterpart_from: impl Into<String>,
        counterpart_to: impl Into<String>,
        amount_wei: U256,
        observed_at: DateTime<Utc>,
        external_ref: impl Into<String>,
    ) -> Self {
        Self {
            counterpart_from: counterpart_from.into(),
            counterpart_to: counterpart_to.into(),
            amount_eth: units::format_ether(amount_wei),
            amount_wei,
            observed_at,
            external_ref: external_ref.into(),
        }
    }

    /// Origin identity, as received from the ledger.
    pub fn counterpart_from(&self) -> &str {
        &self.counterpart_from
    }

    /// Recipient identity, as received from the ledger.
    pub fn counterpart_to(&self) -> &str {
        &self.counterpart_to
    }

    /// Amount in the smallest unit.
    pub fn amount_wei(&self) -> U256 {
        self.amount_wei
    }

    /// Amount as an ether decimal string.
    pub fn amount_eth(&self) -> &str {
        &self.amount_eth
    }

    /// Local ingestion time.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Transaction hash of the originating event.
    pub fn external_ref(&self) -> &str {
        &self.external_ref
    }

    /// The normalized cache/broadcast key for this record.
    pub fn recipient_key(&self) -> RecipientKey {
        RecipientKey::new(&self.counterpart_to)
    }

    /// Payload pushed to live subscribers.
    pub fn notice(&self) -> AllowanceNotice {
        AllowanceNotice {
            from: self.counterpart_from.clone(),
            to: self.counterpart_to.clone(),
            amount_eth: self.amount_eth.clone(),
            timestamp: self.observed_at.timestamp_millis(),
            tx_hash: self.external_ref.clone(),
        }
    }

    /// Entry returned by history queries (the recipient is implied by the key).
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            from: self.counterpart_from.clone(),
            amount_eth: self.amount_eth.clone(),
            timestamp: self.observed_at.timestamp_millis(),
            tx_hash: self.external_ref.clone(),
        }
    }
}

/// Live push payload, delivered as the `new-allowance` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceNotice {
    pub from: String,
    pub to: String,
    pub amount_eth: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub tx_hash: String,
}

/// One element of a `GET /transactions/{key}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub from: String,
    pub amount_eth: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub tx_hash: String,
}
