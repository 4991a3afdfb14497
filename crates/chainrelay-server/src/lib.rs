//! # chainrelay-server
//!
//! HTTP surface of ChainRelay (axum).
//!
//! | route | purpose |
//! |---|---|
//! | `GET /` | liveness banner |
//! | `GET /transactions/:key` | recent history for one recipient, newest first |
//! | `GET /allowance/:child` | current on-chain allowance (needs an HTTP RPC endpoint) |
//! | `GET /events` | Server-Sent Events, one `new-allowance` event per record |
//! | `GET /ws` | WebSocket, one `{"event":"new-allowance","data":…}` frame per record |
//! | `GET /health` | subscriber count, cached keys, ingest counters |

pub mod error;
pub mod push;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use push::{PushFrame, NEW_ALLOWANCE_EVENT};
pub use routes::build_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
