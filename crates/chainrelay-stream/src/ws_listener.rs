//! [`LogListener`] over a JSON-RPC WebSocket: one connection per
//! `subscribe()`, one `eth_subscribe("logs", filter)` per connection.
//!
//! The connection pings the node every `keepalive` interval. If nothing at
//! all arrives for two intervals the connection is reported dead, so a
//! half-open TCP session cannot stall ingestion forever.
//!
//! ```no_run
//! use chainrelay_stream::{AllowanceDecoder, EvmWsListener};
//!
//! # fn main() -> Result<(), chainrelay_core::DecodeError> {
//! let decoder = AllowanceDecoder::allowance_set()?;
//! let listener = EvmWsListener::new(
//!     "wss://sepolia.infura.io/ws/v3/YOUR_KEY",
//!     decoder.log_filter("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
//! );
//! # let _ = listener;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chainrelay_core::StreamError;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::listener::{LogListener, LogNotification, LogStream};

/// Request id of our `eth_subscribe` call.
const SUBSCRIBE_ID: u64 = 1;

/// Default interval between keepalive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

const CHANNEL_CAPACITY: usize = 512;

type Tx = mpsc::Sender<Result<LogNotification, StreamError>>;

pub struct EvmWsListener {
    endpoint: String,
    filter: Value,
    keepalive: Duration,
}

impl EvmWsListener {
    /// `endpoint` is a `ws://` or `wss://` URL; `filter` is the log filter
    /// object sent with `eth_subscribe`.
    pub fn new(endpoint: impl Into<String>, filter: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            filter,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive.max(Duration::from_millis(10));
        self
    }
}

#[async_trait]
impl LogListener for EvmWsListener {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn subscribe(&self) -> Result<LogStream, StreamError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connection = Connection {
            endpoint: self.endpoint.clone(),
            request: subscribe_request(&self.filter),
            keepalive: self.keepalive,
        };
        tokio::spawn(connection.run(tx));
        Ok(Box::pin(rx))
    }
}

fn subscribe_request(filter: &Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_ID,
        "method": "eth_subscribe",
        "params": ["logs", filter],
    })
    .to_string()
}

struct Connection {
    endpoint: String,
    request: String,
    keepalive: Duration,
}

impl Connection {
    /// Drive one connection. Every exit path except a dropped receiver
    /// sends exactly one `Err` describing why the connection ended.
    async fn run(self, mut tx: Tx) {
        if let Err(e) = self.pump(&mut tx).await {
            let _ = tx.send(Err(e)).await;
        }
    }

    async fn pump(&self, tx: &mut Tx) -> Result<(), StreamError> {
        debug!(endpoint = %self.endpoint, "opening WebSocket");
        let (ws, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| StreamError::ConnectionFailed {
                url: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        info!(endpoint = %self.endpoint, "WebSocket open, subscribing to logs");

        let (mut sink, mut frames) = ws.split();
        sink.send(Message::Text(self.request.clone()))
            .await
            .map_err(|e| StreamError::Other(format!("sending eth_subscribe: {e}")))?;

        let mut ping = interval(self.keepalive);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = frames.next() => {
                    last_seen = Instant::now();
                    let item = match frame {
                        None => return Err(StreamError::Closed),
                        Some(Err(e)) => return Err(StreamError::Other(e.to_string())),
                        Some(Ok(Message::Close(reason))) => {
                            info!(endpoint = %self.endpoint, ?reason, "node closed the WebSocket");
                            return Err(StreamError::Closed);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                            continue;
                        }
                        Some(Ok(Message::Text(text))) => classify(&text).into_item(),
                        Some(Ok(_)) => None,
                    };
                    match item {
                        Some(Ok(notification)) => {
                            if tx.send(Ok(notification)).await.is_err() {
                                debug!("listener dropped, closing WebSocket");
                                let _ = sink.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {}
                    }
                }

                _ = ping.tick() => {
                    // A quiet contract never hits the send path above.
                    if tx.is_closed() {
                        debug!(endpoint = %self.endpoint, "listener dropped while idle, closing WebSocket");
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    let silent = last_seen.elapsed();
                    if silent >= self.keepalive * 2 {
                        warn!(endpoint = %self.endpoint, silent_ms = silent.as_millis() as u64, "no traffic from node, dropping connection");
                        return Err(StreamError::Idle {
                            ms: silent.as_millis() as u64,
                        });
                    }
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err(StreamError::Closed);
                    }
                }
            }
        }
    }
}

/// What one text frame from the node means to us.
#[derive(Debug, PartialEq)]
enum Frame {
    Confirmed(String),
    Rejected(String),
    Log(Value),
    Ignored,
}

impl Frame {
    fn into_item(self) -> Option<Result<LogNotification, StreamError>> {
        match self {
            Frame::Confirmed(id) => Some(Ok(LogNotification::Subscribed { id })),
            Frame::Log(log) => Some(Ok(LogNotification::Log(log))),
            Frame::Rejected(reason) => Some(Err(StreamError::SubscribeRejected { reason })),
            Frame::Ignored => None,
        }
    }
}

fn classify(text: &str) -> Frame {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        warn!(len = text.len(), "ignoring non-JSON frame");
        return Frame::Ignored;
    };

    if msg["method"] == "eth_subscription" {
        return match msg["params"].get("result") {
            Some(log) => Frame::Log(log.clone()),
            None => Frame::Ignored,
        };
    }

    if msg["id"].as_u64() != Some(SUBSCRIBE_ID) {
        trace!(frame = %text, "ignoring unrelated frame");
        return Frame::Ignored;
    }
    if let Some(err) = msg.get("error") {
        let reason = err["message"]
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string());
        return Frame::Rejected(reason);
    }
    match msg["result"].as_str() {
        Some(id) => Frame::Confirmed(id.to_owned()),
        None => Frame::Rejected(format!("unexpected eth_subscribe reply: {text}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    #[test]
    fn log_notification() {
        let frame = classify(
            r#"{"jsonrpc":"2.0","method":"eth_subscription",
                "params":{"subscription":"0x9c","result":{"transactionHash":"0xfeed","removed":false}}}"#,
        );
        let Frame::Log(log) = frame else {
            panic!("expected a log, got {frame:?}");
        };
        assert_eq!(log["transactionHash"], "0xfeed");
    }

    #[test]
    fn confirmation_and_rejection() {
        assert_eq!(
            classify(r#"{"jsonrpc":"2.0","id":1,"result":"0x9c"}"#),
            Frame::Confirmed("0x9c".into())
        );
        assert_eq!(
            classify(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#),
            Frame::Rejected("method not found".into())
        );
        assert!(matches!(
            classify(r#"{"jsonrpc":"2.0","id":1,"result":null}"#),
            Frame::Rejected(_)
        ));
    }

    #[test]
    fn unrelated_frames_are_ignored() {
        assert_eq!(classify("not json"), Frame::Ignored);
        assert_eq!(classify(r#"{"jsonrpc":"2.0","id":7,"result":"0x1"}"#), Frame::Ignored);
        assert_eq!(
            classify(r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{}}"#),
            Frame::Ignored
        );
    }

    #[test]
    fn rejection_ends_the_stream_with_an_error() {
        let item = Frame::Rejected("nope".into()).into_item();
        assert!(matches!(item, Some(Err(StreamError::SubscribeRejected { .. }))));
        assert!(Frame::Ignored.into_item().is_none());
    }

    #[test]
    fn subscribe_request_carries_filter() {
        let req: Value =
            serde_json::from_str(&subscribe_request(&json!({ "address": "0xc0ffee" }))).unwrap();
        assert_eq!(req["method"], "eth_subscribe");
        assert_eq!(req["id"], SUBSCRIBE_ID);
        assert_eq!(req["params"][0], "logs");
        assert_eq!(req["params"][1]["address"], "0xc0ffee");
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_connection_failed() {
        let listener = EvmWsListener::new("ws://127.0.0.1:1", json!({}));
        let mut stream = listener.subscribe().await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(StreamError::ConnectionFailed { .. }))
        ));
    }

    type ServerWs = WebSocketStream<TcpStream>;

    /// Accept one WebSocket client on a free local port and hand it to `session`.
    async fn local_node<F, Fut>(session: F) -> String
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            session(ws).await;
        });
        format!("ws://{addr}")
    }

    async fn confirm_subscription(ws: &mut ServerWs) -> Value {
        let request = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("client went away before subscribing: {other:?}"),
            }
        };
        ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#.into()))
            .await
            .unwrap();
        request
    }

    async fn next_item(stream: &mut LogStream) -> Option<Result<LogNotification, StreamError>> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no stream item within 5s")
    }

    #[tokio::test]
    async fn live_socket_forwards_then_drops_a_silent_node() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let url = local_node(|mut ws| async move {
            let request = confirm_subscription(&mut ws).await;
            ws.send(Message::Text(
                r#"{"jsonrpc":"2.0","method":"eth_subscription",
                    "params":{"subscription":"0xabc","result":{"transactionHash":"0x1"}}}"#
                    .into(),
            ))
            .await
            .unwrap();

            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            let mut ponged = false;
            while let Some(Ok(msg)) = ws.next().await {
                if msg == Message::Pong(b"hb".to_vec()) {
                    ponged = true;
                    break;
                }
            }
            let _ = seen_tx.send((request, ponged));

            // Keep the socket open but stop reading and writing.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(ws);
        })
        .await;

        let listener = EvmWsListener::new(url, json!({ "address": "0x1" }))
            .with_keepalive(Duration::from_millis(100));
        let mut stream = listener.subscribe().await.unwrap();

        assert!(matches!(
            next_item(&mut stream).await,
            Some(Ok(LogNotification::Subscribed { ref id })) if id == "0xabc"
        ));
        match next_item(&mut stream).await {
            Some(Ok(LogNotification::Log(log))) => assert_eq!(log["transactionHash"], "0x1"),
            other => panic!("expected a log, got {other:?}"),
        }

        let (request, ponged) = seen_rx.await.unwrap();
        assert_eq!(request["method"], "eth_subscribe");
        assert_eq!(request["params"][0], "logs");
        assert_eq!(request["params"][1]["address"], "0x1");
        assert!(ponged, "node ping was not answered");

        match next_item(&mut stream).await {
            Some(Err(StreamError::Idle { ms })) => assert!(ms >= 200, "dropped after {ms}ms"),
            other => panic!("expected an idle drop, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_stream_closes_a_quiet_socket() {
        let (closed_tx, closed_rx) = oneshot::channel();
        let url = local_node(|mut ws| async move {
            confirm_subscription(&mut ws).await;
            let mut saw_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    saw_close = true;
                    break;
                }
            }
            let _ = closed_tx.send(saw_close);
        })
        .await;

        let listener = EvmWsListener::new(url, json!({})).with_keepalive(Duration::from_millis(50));
        let mut stream = listener.subscribe().await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Ok(LogNotification::Subscribed { .. }))
        ));
        drop(stream);

        let saw_close = tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("socket still open after the stream was dropped")
            .unwrap();
        assert!(saw_close);
    }
}
