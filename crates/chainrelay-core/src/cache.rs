//! Bounded, newest-first record history per recipient.
//!
//! Each key maps to an immutable `Arc<[Arc<Record>]>` snapshot. `put` builds
//! the next snapshot and swaps it in under the write lock; `get` clones the
//! current snapshot under the read lock. A reader therefore sees either the
//! sequence before an insert or the one after it, never a mix of both.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::record::{RecipientKey, Record};

/// Maximum number of records kept per recipient unless configured otherwise.
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// A snapshot of one recipient's history, newest first.
pub type History = Arc<[Arc<Record>]>;

/// Thread-safe in-memory history cache. Cheap to clone.
#[derive(Clone)]
pub struct HistoryCache {
    capacity: usize,
    inner: Arc<RwLock<HashMap<RecipientKey, History>>>,
}

impl HistoryCache {
    /// Create a cache holding at most `capacity` records per key.
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Maximum records retained per key.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `record` at the front of `key`'s history, evicting the oldest
    /// entry once the history exceeds capacity.
    pub fn put(&self, key: impl Into<RecipientKey>, record: Arc<Record>) {
        let key = key.into();
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let next: History = {
            let prev = map.get(&key).map(|h| &h[..]).unwrap_or(&[]);
            std::iter::once(record)
                .chain(prev.iter().take(self.capacity - 1).cloned())
                .collect()
        };
        map.insert(key, next);
    }

    /// The history for `key`, newest first; empty if the key was never seen.
    pub fn get(&self, key: impl Into<RecipientKey>) -> History {
        let key = key.into();
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Number of recipients with at least one record.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
