//! # chainrelay-core
//!
//! Core types shared across all ChainRelay crates.
//!
//! - [`Record`]: one observed allowance event, normalized and immutable
//! - [`RecipientKey`]: canonical (lower-cased) recipient identity
//! - [`HistoryCache`]: bounded, newest-first history per recipient
//! - [`BroadcastHub`]: fan-out of new records to live subscribers
//! - [`units`]: smallest-unit ⇄ ether decimal conversion
//! - [`retry`]: exponential backoff with jitter

pub mod cache;
pub mod error;
pub mod hub;
pub mod record;
pub mod retry;
pub mod units;

pub use cache::{HistoryCache, DEFAULT_HISTORY_SIZE};
pub use error::{DecodeError, StreamError, UnitsError};
pub use hub::{BroadcastHub, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use record::{AllowanceNotice, HistoryEntry, RecipientKey, Record};
pub use retry::{Backoff, RetryPolicy};
