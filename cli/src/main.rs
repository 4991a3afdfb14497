//! `chainrelay` binary: runs the allowance notifier.
//!
//! # Commands
//! ```text
//! chainrelay serve      --ws-url <wss://...> --contract <0x...> [--port 5000] [--http-url <https://...>]
//! chainrelay signature  [--event "event AllowanceSet(...)"] [--json]
//! chainrelay convert    --wei <N> | --eth <decimal>
//! chainrelay version
//! ```

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{anyhow, Context, Result};
use chainrelay_core::units::{format_ether, parse_ether};
use chainrelay_core::{BroadcastHub, HistoryCache, DEFAULT_HISTORY_SIZE, DEFAULT_SUBSCRIBER_BUFFER};
use chainrelay_observability::{init_tracing, LogConfig, LogFormat};
use chainrelay_rpc::{AllowanceReader, HttpRpcClient, DEFAULT_ALLOWANCE_FUNCTION};
use chainrelay_server::AppState;
use chainrelay_stream::{EventSignature, IngestEngine, StreamConfig, DEFAULT_EVENT_SIGNATURE};
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "chainrelay",
    about = "ChainRelay allowance event notifier",
    long_about = "
ChainRelay subscribes to a contract's AllowanceSet events, keeps the most
recent events per recipient in memory and pushes new ones to connected
clients over SSE and WebSocket.

ENVIRONMENT VARIABLES:
  WSS_INFURA_URL     WebSocket RPC endpoint (serve --ws-url)
  CONTRACT_ADDRESS   Contract emitting the events (serve --contract)
  INFURA_URL         HTTP RPC endpoint for /allowance lookups (serve --http-url)
  PORT               HTTP listen port (serve --port)
  RUST_LOG           Overrides --log-level when set
",
    version
)]
struct Cli {
    /// Global log level: trace | debug | info | warn | error
    #[arg(long, global = true, env = "CHAINRELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log line format: text | compact | json
    #[arg(long, global = true, env = "CHAINRELAY_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest pipeline and the HTTP API
    Serve(ServeArgs),

    /// Print the canonical signature and topic0 of an event declaration
    Signature {
        /// Solidity event declaration
        #[arg(long = "event", default_value = DEFAULT_EVENT_SIGNATURE)]
        event_signature: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert between wei and ether decimal strings
    Convert {
        /// Smallest-unit integer to render as ether
        #[arg(long, conflicts_with = "eth", required_unless_present = "eth")]
        wei: Option<String>,
        /// Ether decimal to render as wei
        #[arg(long)]
        eth: Option<String>,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// WebSocket JSON-RPC endpoint
    #[arg(long, env = "WSS_INFURA_URL")]
    ws_url: String,

    /// Contract whose events are consumed
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract: String,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// HTTP JSON-RPC endpoint; enables GET /allowance/:child
    #[arg(long, env = "INFURA_URL")]
    http_url: Option<String>,

    /// Solidity event declaration to subscribe to
    #[arg(long, default_value = DEFAULT_EVENT_SIGNATURE)]
    event_signature: String,

    /// Event parameter holding the origin
    #[arg(long, default_value = "parent")]
    origin_field: String,

    /// Event parameter holding the recipient
    #[arg(long, default_value = "child")]
    recipient_field: String,

    /// Event parameter holding the amount
    #[arg(long, default_value = "amount")]
    amount_field: String,

    /// Getter used by /allowance
    #[arg(long, default_value = DEFAULT_ALLOWANCE_FUNCTION)]
    allowance_function: String,

    /// Records kept per recipient
    #[arg(long, default_value_t = DEFAULT_HISTORY_SIZE)]
    history_size: usize,

    /// Per-subscriber push queue length
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    subscriber_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let log = LogConfig {
                level: cli.log_level,
                format: cli.log_format,
                ..LogConfig::default()
            };
            init_tracing(&log).map_err(|e| anyhow!("failed to initialise logging: {e}"))?;
            cmd_serve(args).await
        }

        Commands::Signature {
            event_signature,
            json,
        } => cmd_signature(&event_signature, json),

        Commands::Convert { wei, eth } => cmd_convert(wei.as_deref(), eth.as_deref()),

        Commands::Version => {
            println!("chainrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ─── serve ───────────────────────────────────────────────────────────────────

impl ServeArgs {
    fn stream_config(&self) -> StreamConfig {
        let mut config = StreamConfig::new(self.ws_url.clone(), self.contract.clone());
        config.event_signature = self.event_signature.clone();
        config.origin_field = self.origin_field.clone();
        config.recipient_field = self.recipient_field.clone();
        config.amount_field = self.amount_field.clone();
        config
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    Address::from_str(args.contract.trim())
        .with_context(|| format!("invalid contract address: {}", args.contract))?;

    let cache = HistoryCache::new(args.history_size);
    let hub = BroadcastHub::new(args.subscriber_buffer);

    let engine = IngestEngine::from_config(args.stream_config(), cache.clone(), hub.clone())
        .context("invalid event configuration")?;
    let mut state = AppState::new(cache, hub, engine.metrics());

    if let Some(url) = &args.http_url {
        let client = HttpRpcClient::default_for(url.clone()).context("HTTP RPC client")?;
        let reader =
            AllowanceReader::with_function(Arc::new(client), &args.contract, &args.allowance_function)
                .context("invalid allowance getter")?;
        state = state.with_allowance(Arc::new(reader));
        info!("allowance lookups enabled");
    } else {
        info!("no HTTP RPC endpoint configured, /allowance disabled");
    }

    let ingest = engine.spawn();

    let addr = args.listen_addr();
    let result = chainrelay_server::serve(addr, state, shutdown_signal())
        .await
        .with_context(|| format!("HTTP server on {addr}"));

    ingest.abort();
    info!("shut down");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ─── signature / convert ─────────────────────────────────────────────────────

fn cmd_signature(declaration: &str, json: bool) -> Result<()> {
    let sig = EventSignature::parse(declaration).context("could not parse event declaration")?;

    if json {
        let out = serde_json::json!({
            "name": sig.name(),
            "signature": sig.canonical(),
            "topic0": sig.topic0(),
            "indexed": sig.indexed_count(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Event:     {}", sig.name());
        println!("Signature: {}", sig.canonical());
        println!("Topic0:    {}", sig.topic0());
        println!("Indexed:   {}", sig.indexed_count());
    }
    Ok(())
}

fn cmd_convert(wei: Option<&str>, eth: Option<&str>) -> Result<()> {
    match (wei, eth) {
        (Some(wei), _) => {
            let value = alloy_primitives::U256::from_str_radix(wei.trim(), 10)
                .with_context(|| format!("not a base-10 integer: {wei}"))?;
            println!("{}", format_ether(value));
        }
        (None, Some(eth)) => {
            println!("{}", parse_ether(eth)?);
        }
        (None, None) => return Err(anyhow!("pass --wei or --eth")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from([
            "chainrelay",
            "serve",
            "--ws-url",
            "wss://node.example/ws",
            "--contract",
            "0x5fbdb2315678afecb367f032d93f642f64180aa3",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.history_size, DEFAULT_HISTORY_SIZE);
        assert_eq!(args.recipient_field, "child");

        let config = args.stream_config();
        assert_eq!(config.event_signature, DEFAULT_EVENT_SIGNATURE);
        assert_eq!(config.contract_address, "0x5fbdb2315678afecb367f032d93f642f64180aa3");
    }

    #[test]
    fn log_format_is_parsed() {
        let cli = Cli::try_parse_from(["chainrelay", "--log-format", "json", "version"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["chainrelay", "--log-format", "xml", "version"]).is_err());
    }

    #[test]
    fn listen_addr_uses_bind_and_port() {
        let cli = Cli::try_parse_from([
            "chainrelay",
            "serve",
            "--ws-url",
            "wss://x",
            "--contract",
            "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "--bind",
            "127.0.0.1",
            "--port",
            "8080",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen_addr().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn convert_requires_exactly_one_side() {
        assert!(Cli::try_parse_from(["chainrelay", "convert"]).is_err());
        assert!(Cli::try_parse_from(["chainrelay", "convert", "--wei", "1", "--eth", "1"]).is_err());
        assert!(Cli::try_parse_from(["chainrelay", "convert", "--eth", "0.5"]).is_ok());
    }

    #[test]
    fn signature_command_accepts_default() {
        assert!(cmd_signature(DEFAULT_EVENT_SIGNATURE, true).is_ok());
        assert!(cmd_signature("garbage", false).is_err());
    }
}
