//! Live push of new records over Server-Sent Events and WebSocket.
//!
//! Every connection gets its own hub subscription. Dropping the connection
//! drops the subscription, which removes it from the hub.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use chainrelay_core::{AllowanceNotice, Record};
use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Event name carried by every push message.
pub const NEW_ALLOWANCE_EVENT: &str = "new-allowance";

pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// WebSocket frame: `{"event":"new-allowance","data":{...}}`.
#[derive(Debug, Serialize)]
pub struct PushFrame<'a> {
    pub event: &'a str,
    pub data: AllowanceNotice,
}

impl PushFrame<'static> {
    pub fn new_allowance(record: &Record) -> Self {
        Self {
            event: NEW_ALLOWANCE_EVENT,
            data: record.notice(),
        }
    }
}

fn sse_event(record: &Record) -> Option<Event> {
    match Event::default()
        .event(NEW_ALLOWANCE_EVENT)
        .json_data(record.notice())
    {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, tx = record.external_ref(), "failed to encode SSE event");
            None
        }
    }
}

pub(crate) async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    info!(subscriber = %subscription.id(), "SSE client connected");

    let stream = subscription
        .filter_map(|record| async move { sse_event(&record).map(Ok::<_, Infallible>) });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}

pub(crate) async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let mut subscription = state.hub.subscribe();
    let id = subscription.id();
    info!(subscriber = %id, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            record = subscription.recv() => {
                let Some(record) = record else {
                    // pruned by the hub (queue full); client must reconnect and resync
                    warn!(subscriber = %id, "subscription dropped by hub, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let frame = match serde_json::to_string(&PushFrame::new_allowance(&record)) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode push frame");
                        continue;
                    }
                };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(other)) => debug!(subscriber = %id, ?other, "ignoring client frame"),
                }
            }
        }
    }

    info!(subscriber = %id, "WebSocket client disconnected");
}
