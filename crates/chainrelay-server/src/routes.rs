//! Router and the request/response handlers.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chainrelay_core::{HistoryEntry, RecipientKey};
use chainrelay_stream::MetricsSnapshot;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::ApiError;
use crate::push;
use crate::state::AppState;

pub const BANNER: &str = "chainrelay allowance API is running";

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct AllowanceResponse {
    pub allowance: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub subscribers: usize,
    pub keys: usize,
    pub stream: MetricsSnapshot,
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/transactions/:key", get(transactions))
        .route("/allowance/:child", get(allowance))
        .route("/events", get(push::sse_events))
        .route("/ws", get(push::ws_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    BANNER
}

/// Recent history for one recipient, newest first.
async fn transactions(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<TransactionsResponse> {
    let key = RecipientKey::new(&key);
    let history = state.cache.get(&key);
    debug!(key = %key, count = history.len(), "history query");
    Json(TransactionsResponse {
        transactions: history.iter().map(|r| r.history_entry()).collect(),
    })
}

async fn allowance(
    State(state): State<AppState>,
    Path(child): Path<String>,
) -> Result<Json<AllowanceResponse>, ApiError> {
    let reader = state
        .allowance
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("allowance lookups are not configured".into()))?;
    let allowance = reader.allowance_eth(&child).await?;
    Ok(Json(AllowanceResponse { allowance }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        subscribers: state.hub.subscriber_count(),
        keys: state.cache.len(),
        stream: state.metrics.snapshot(),
    })
}
