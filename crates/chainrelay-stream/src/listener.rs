//! `LogListener` trait: abstraction over the log subscription transport.
//!
//! A listener produces one stream per connection attempt. The stream ends
//! (or yields an error) when the connection drops; the ingest engine then
//! calls `subscribe()` again after a backoff.

use async_trait::async_trait;
use chainrelay_core::StreamError;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// One item from a live log subscription.
#[derive(Debug, Clone)]
pub enum LogNotification {
    /// The node accepted the subscription.
    Subscribed { id: String },
    /// The `params.result` object of an `eth_subscription` message.
    Log(Value),
}

/// A stream of notifications from one connection.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogNotification, StreamError>> + Send>>;

#[async_trait]
pub trait LogListener: Send + Sync {
    /// Endpoint this listener connects to (for logging).
    fn endpoint(&self) -> &str;

    /// Connect and start streaming notifications.
    async fn subscribe(&self) -> Result<LogStream, StreamError>;
}
