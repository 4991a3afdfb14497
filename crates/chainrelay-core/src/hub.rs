//! Fan-out of newly cached records to live subscribers.
//!
//! Every subscriber owns a bounded queue. `publish` walks the subscriber set
//! once under the lock and uses non-blocking `try_send`, so one slow or
//! broken subscriber never delays the others. Subscribers whose queue is
//! closed or full are pruned during that walk; a pruned subscriber sees its
//! stream end and is expected to reconnect and resync from the cache.
//!
//! No recipient filtering happens here: every subscriber receives every
//! record and compares `to` against its own identity.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::record::Record;

/// Default per-subscriber queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identifier of one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<Record>>>,
}

/// Broadcasts records to all connected subscribers. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    buffer: usize,
    inner: Arc<Mutex<HubInner>>,
}

impl BroadcastHub {
    /// Create a hub whose subscribers buffer at most `buffer` records each.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            inner: Arc::new(Mutex::new(HubInner::default())),
        }
    }

    /// Register a new live subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.lock();
        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        tracing::debug!(subscriber = %id, total = inner.subscribers.len(), "subscriber connected");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        remove(&self.inner, id);
    }

    /// Deliver `record` to every open subscriber, pruning dead or lagging
    /// ones. Returns the number of subscribers that received it.
    pub fn publish(&self, record: Arc<Record>) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;
        inner.subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&record)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "pruning closed subscriber");
                false
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "subscriber queue full, disconnecting");
                false
            }
        });
        delivered
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

fn remove(inner: &Mutex<HubInner>, id: SubscriberId) {
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if inner.subscribers.remove(&id).is_some() {
        tracing::debug!(subscriber = %id, total = inner.subscribers.len(), "subscriber removed");
    }
}

/// A live subscription handle. Records arrive in publish order.
///
/// Dropping the handle unsubscribes it.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<Record>>,
    hub: Weak<Mutex<HubInner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next record. `None` once the subscriber has been pruned
    /// or the hub dropped.
    pub async fn recv(&mut self) -> Option<Arc<Record>> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining.
    pub fn try_recv(&mut self) -> Option<Arc<Record>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Arc<Record>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            remove(&inner, self.id);
        }
    }
}
