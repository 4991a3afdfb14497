//! `tracing-subscriber` setup: one `EnvFilter` plus one formatting layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt as layer_fmt, EnvFilter};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field human-readable lines.
    #[default]
    Text,
    /// Single-line human-readable, shorter field rendering.
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (text | compact | json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level for everything not listed in `components`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Crate or module → level, e.g. `chainrelay-stream = "debug"`.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `"info,chainrelay_stream=debug"`.
    /// Component names may use dashes; targets always use underscores.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(target, level)| format!("{}={level}", target.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` when set and valid, otherwise our directives, otherwise `info`.
    fn env_filter(&self) -> EnvFilter {
        std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .and_then(|env| EnvFilter::try_new(env).ok())
            .or_else(|| EnvFilter::try_new(self.directives()).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    match config.format {
        LogFormat::Text => registry.with(layer_fmt::layer()).try_init()?,
        LogFormat::Compact => registry.with(layer_fmt::layer().compact()).try_init()?,
        LogFormat::Json => registry
            .with(layer_fmt::layer().json().flatten_event(true))
            .try_init()?,
    }

    tracing::debug!(format = %config.format, directives = %config.directives(), "logging initialised");
    Ok(())
}
