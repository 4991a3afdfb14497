//! Ingest configuration.

use chainrelay_core::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::signature::DEFAULT_EVENT_SIGNATURE;
use crate::ws_listener::DEFAULT_KEEPALIVE;

/// Configuration for the event source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// WebSocket RPC endpoint, e.g. "wss://sepolia.infura.io/ws/v3/..."
    pub ws_url: String,
    /// Contract whose events are consumed
    pub contract_address: String,
    /// Human-readable event declaration
    #[serde(default = "default_event_signature")]
    pub event_signature: String,
    /// Parameter holding the origin identity
    #[serde(default = "default_origin_field")]
    pub origin_field: String,
    /// Parameter holding the recipient identity
    #[serde(default = "default_recipient_field")]
    pub recipient_field: String,
    /// Parameter holding the smallest-unit amount
    #[serde(default = "default_amount_field")]
    pub amount_field: String,
    /// Capacity of the internal record queue between ingest and fan-out
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Initial reconnect backoff in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub reconnect_initial_ms: u64,
    /// Maximum reconnect backoff in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub reconnect_max_ms: u64,
    /// Reconnect jitter as a fraction of the delay
    #[serde(default = "default_jitter")]
    pub reconnect_jitter: f64,
    /// Consecutive failures after which reconnect attempts log at error level
    #[serde(default = "default_warn_after")]
    pub reconnect_warn_after: u32,
    /// Seconds between WebSocket pings; two silent intervals drop the connection
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_event_signature() -> String { DEFAULT_EVENT_SIGNATURE.into() }
fn default_origin_field() -> String { "parent".into() }
fn default_recipient_field() -> String { "child".into() }
fn default_amount_field() -> String { "amount".into() }
fn default_queue_capacity() -> usize { 1_024 }
fn default_backoff_ms() -> u64 { 500 }
fn default_backoff_max_ms() -> u64 { 60_000 }
fn default_jitter() -> f64 { 0.2 }
fn default_warn_after() -> u32 { 5 }
fn default_keepalive_secs() -> u64 { DEFAULT_KEEPALIVE.as_secs() }

impl StreamConfig {
    /// A config with defaults for everything but the endpoint and contract.
    pub fn new(ws_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract_address: contract_address.into(),
            event_signature: default_event_signature(),
            origin_field: default_origin_field(),
            recipient_field: default_recipient_field(),
            amount_field: default_amount_field(),
            queue_capacity: default_queue_capacity(),
            reconnect_initial_ms: default_backoff_ms(),
            reconnect_max_ms: default_backoff_max_ms(),
            reconnect_jitter: default_jitter(),
            reconnect_warn_after: default_warn_after(),
            keepalive_secs: default_keepalive_secs(),
        }
    }

    /// Backoff policy for re-establishing the subscription.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        let backoff = Backoff {
            initial: Duration::from_millis(self.reconnect_initial_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            jitter: self.reconnect_jitter,
            ..Backoff::reconnect()
        };
        RetryPolicy::new(backoff, self.reconnect_warn_after)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_defaults_fill_in() {
        let cfg: StreamConfig = serde_json::from_value(serde_json::json!({
            "ws_url": "wss://example",
            "contract_address": "0xc0ffee",
        }))
        .unwrap();
        assert_eq!(cfg.event_signature, DEFAULT_EVENT_SIGNATURE);
        assert_eq!(cfg.recipient_field, "child");
        assert_eq!(cfg.queue_capacity, 1_024);
    }

    #[test]
    fn reconnect_policy_uses_config() {
        let mut cfg = StreamConfig::new("wss://example", "0xc0ffee");
        cfg.reconnect_initial_ms = 10;
        cfg.reconnect_max_ms = 40;
        cfg.reconnect_jitter = 0.0;
        let policy = cfg.reconnect_policy();
        assert_eq!(policy.backoff().delay(1), Duration::from_millis(10));
        assert_eq!(policy.backoff().delay(10), Duration::from_millis(40));
        assert!(!policy.within_limit(6));
    }
}
