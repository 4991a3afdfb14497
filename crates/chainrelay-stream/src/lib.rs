//! # chainrelay-stream
//!
//! Event source adapter for ChainRelay.
//!
//! Subscribes to `AllowanceSet` logs of one contract over a JSON-RPC
//! WebSocket, decodes each log into a [`chainrelay_core::Record`], writes it
//! to the per-recipient history cache and broadcasts it to live subscribers.
//!
//! ## Architecture
//! ```text
//! EvmWsListener (eth_subscribe "logs", Tokio task per connection)
//!       │
//!       ▼
//! AllowanceDecoder (topic0 check → topics + data → Record)
//!       │
//!       ▼
//! bounded mpsc<Arc<Record>>
//!       │
//!       ▼
//! sink task: HistoryCache::put, then BroadcastHub::publish
//! ```

pub mod config;
pub mod decoder;
pub mod engine;
pub mod listener;
pub mod signature;
pub mod ws_listener;

pub use config::StreamConfig;
pub use decoder::{AllowanceDecoder, DecodedAllowance, RawLog};
pub use engine::{IngestEngine, IngestHandle, MetricsSnapshot, StreamMetrics};
pub use listener::{LogListener, LogNotification, LogStream};
pub use signature::{keccak256_signature, EventSignature, DEFAULT_EVENT_SIGNATURE};
pub use ws_listener::{EvmWsListener, DEFAULT_KEEPALIVE};
