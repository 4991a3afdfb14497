//! # chainrelay-observability
//!
//! Structured logging for ChainRelay.
//!
//! Human-readable text by default, compact lines or JSON on request.
//! Levels are configurable globally and per component; `RUST_LOG` takes
//! precedence when set.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig, LogFormat};
