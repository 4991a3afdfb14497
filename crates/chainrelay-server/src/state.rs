//! Shared handler state.

use std::sync::Arc;

use chainrelay_core::{BroadcastHub, HistoryCache};
use chainrelay_rpc::AllowanceReader;
use chainrelay_stream::StreamMetrics;

/// Everything a request handler may touch. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub cache: HistoryCache,
    pub hub: BroadcastHub,
    pub metrics: Arc<StreamMetrics>,
    /// `None` when no HTTP RPC endpoint is configured.
    pub allowance: Option<Arc<AllowanceReader>>,
}

impl AppState {
    pub fn new(cache: HistoryCache, hub: BroadcastHub, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            cache,
            hub,
            metrics,
            allowance: None,
        }
    }

    /// Enable `GET /allowance/:child`.
    pub fn with_allowance(mut self, reader: Arc<AllowanceReader>) -> Self {
        self.allowance = Some(reader);
        self
    }
}
