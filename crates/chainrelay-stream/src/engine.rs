//! `IngestEngine`: owns the subscription loop and feeds decoded records
//! into the history cache and the broadcast hub.
//!
//! Two tasks are spawned:
//! - **ingest**: subscribe → decode → push onto a bounded queue.
//!   Reconnects with exponential backoff whenever the stream ends.
//! - **sink**: pop a record → `cache.put` → `hub.publish`.
//!
//! The cache write always happens before the broadcast, so a client that
//! queries history right after receiving a notification sees that record.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chainrelay_core::{BroadcastHub, HistoryCache, Record, StreamError};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::decoder::{AllowanceDecoder, RawLog};
use crate::listener::{LogListener, LogNotification};
use crate::signature::EventSignature;
use crate::ws_listener::EvmWsListener;

/// Live counters for the ingest pipeline.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    events_decoded: AtomicU64,
    events_skipped: AtomicU64,
    decode_errors: AtomicU64,
    reconnections: AtomicU64,
    records_published: AtomicU64,
    connected: AtomicBool,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub connected: bool,
    pub events_decoded: u64,
    pub events_skipped: u64,
    pub decode_errors: u64,
    pub reconnections: u64,
    pub records_published: u64,
}

impl StreamMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            events_decoded: self.events_decoded.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handles to the two background tasks.
pub struct IngestHandle {
    ingest: JoinHandle<()>,
    sink: JoinHandle<()>,
}

impl IngestHandle {
    /// Stop both tasks. Records still queued are dropped.
    pub fn abort(&self) {
        self.ingest.abort();
        self.sink.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished() && self.sink.is_finished()
    }
}

/// The ingest pipeline for one contract and one event.
///
/// # Usage
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use chainrelay_core::{BroadcastHub, HistoryCache};
/// use chainrelay_stream::{IngestEngine, StreamConfig};
///
/// let config = StreamConfig::new("wss://sepolia.infura.io/ws/v3/KEY", "0x5FbDB2315678afecb367f032d93F642f64180aa3");
/// let engine = IngestEngine::from_config(config, HistoryCache::default(), BroadcastHub::default())?;
/// let handle = engine.spawn();
/// # handle.abort();
/// # Ok(())
/// # }
/// ```
pub struct IngestEngine {
    config: StreamConfig,
    listener: Arc<dyn LogListener>,
    decoder: AllowanceDecoder,
    cache: HistoryCache,
    hub: BroadcastHub,
    metrics: Arc<StreamMetrics>,
}

impl IngestEngine {
    pub fn new(
        config: StreamConfig,
        listener: Arc<dyn LogListener>,
        decoder: AllowanceDecoder,
        cache: HistoryCache,
        hub: BroadcastHub,
    ) -> Self {
        Self {
            config,
            listener,
            decoder,
            cache,
            hub,
            metrics: Arc::new(StreamMetrics::default()),
        }
    }

    /// Build the decoder and a WebSocket listener from `config`.
    pub fn from_config(
        config: StreamConfig,
        cache: HistoryCache,
        hub: BroadcastHub,
    ) -> Result<Self, chainrelay_core::DecodeError> {
        let signature = EventSignature::parse(&config.event_signature)?;
        let decoder = AllowanceDecoder::new(
            signature,
            &config.origin_field,
            &config.recipient_field,
            &config.amount_field,
        )?;
        let listener = EvmWsListener::new(
            config.ws_url.clone(),
            decoder.log_filter(&config.contract_address),
        )
        .with_keepalive(config.keepalive());
        Ok(Self::new(config, Arc::new(listener), decoder, cache, hub))
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start the ingest and sink tasks. Returns immediately.
    pub fn spawn(self) -> IngestHandle {
        let (tx, rx) = mpsc::channel::<Arc<Record>>(self.config.queue_capacity.max(1));

        let sink = tokio::spawn(run_sink(
            rx,
            self.cache.clone(),
            self.hub.clone(),
            Arc::clone(&self.metrics),
        ));
        let ingest = tokio::spawn(async move { self.run_ingest(tx).await });

        IngestHandle { ingest, sink }
    }

    async fn run_ingest(self, tx: mpsc::Sender<Arc<Record>>) {
        let policy = self.config.reconnect_policy();
        let endpoint = self.listener.endpoint().to_string();
        let topic0 = self.decoder.signature().topic0().to_string();
        let mut attempt = 0u32;

        info!(
            endpoint = %endpoint,
            contract = %self.config.contract_address,
            event = %self.decoder.signature().canonical(),
            topic0 = %topic0,
            "ingest starting"
        );

        loop {
            let reason = match self.listener.subscribe().await {
                Err(e) => e,
                Ok(mut stream) => {
                    let mut reason = StreamError::Closed;
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(LogNotification::Subscribed { id }) => {
                                attempt = 0;
                                self.metrics.connected.store(true, Ordering::Relaxed);
                                info!(endpoint = %endpoint, subscription = %id, "subscribed to logs");
                            }
                            Ok(LogNotification::Log(value)) => {
                                attempt = 0;
                                if !self.handle_log(value, &tx).await {
                                    info!("record queue closed, stopping ingest");
                                    return;
                                }
                            }
                            Err(e) => {
                                reason = e;
                                break;
                            }
                        }
                    }
                    reason
                }
            };

            self.metrics.connected.store(false, Ordering::Relaxed);
            StreamMetrics::incr(&self.metrics.reconnections);
            attempt = attempt.saturating_add(1);
            let delay = policy.backoff().delay(attempt);

            if policy.within_limit(attempt) {
                warn!(endpoint = %endpoint, attempt, delay_ms = delay.as_millis() as u64, error = %reason, "event stream lost, reconnecting");
            } else {
                error!(endpoint = %endpoint, attempt, delay_ms = delay.as_millis() as u64, error = %reason, "event stream still down, reconnecting");
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Decode one log and queue the record. Returns `false` once the sink
    /// has gone away.
    async fn handle_log(&self, value: Value, tx: &mpsc::Sender<Arc<Record>>) -> bool {
        let log = match RawLog::from_value(value) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "skipping malformed log notification");
                StreamMetrics::incr(&self.metrics.decode_errors);
                return true;
            }
        };

        if log.removed {
            debug!(tx = ?log.transaction_hash, "skipping removed (reorged) log");
            StreamMetrics::incr(&self.metrics.events_skipped);
            return true;
        }

        match self.decoder.decode(&log) {
            Ok(decoded) => {
                StreamMetrics::incr(&self.metrics.events_decoded);
                let record = Arc::new(decoded.into_record(Utc::now()));
                debug!(
                    from = record.counterpart_from(),
                    to = record.counterpart_to(),
                    amount_eth = record.amount_eth(),
                    tx = record.external_ref(),
                    "decoded allowance event"
                );
                tx.send(record).await.is_ok()
            }
            Err(e) => {
                warn!(tx = ?log.transaction_hash, error = %e, "failed to decode log");
                StreamMetrics::incr(&self.metrics.decode_errors);
                true
            }
        }
    }
}

async fn run_sink(
    mut rx: mpsc::Receiver<Arc<Record>>,
    cache: HistoryCache,
    hub: BroadcastHub,
    metrics: Arc<StreamMetrics>,
) {
    while let Some(record) = rx.recv().await {
        cache.put(record.recipient_key(), Arc::clone(&record));
        let delivered = hub.publish(record);
        StreamMetrics::incr(&metrics.records_published);
        debug!(delivered, "record published");
    }
    debug!("sink stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let m = StreamMetrics::default();
        StreamMetrics::incr(&m.events_decoded);
        StreamMetrics::incr(&m.events_decoded);
        StreamMetrics::incr(&m.reconnections);
        m.connected.store(true, Ordering::Relaxed);

        let snap = m.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.events_decoded, 2);
        assert_eq!(snap.reconnections, 1);
        assert_eq!(snap.decode_errors, 0);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let v = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert!(v.get("eventsDecoded").is_some());
        assert!(v.get("recordsPublished").is_some());
    }

    #[test]
    fn from_config_rejects_bad_field_names() {
        let mut cfg = StreamConfig::new("ws://localhost:1", "0xc0ffee");
        cfg.recipient_field = "nobody".into();
        let result = IngestEngine::from_config(cfg, HistoryCache::default(), BroadcastHub::default());
        assert!(result.is_err());
    }
}
