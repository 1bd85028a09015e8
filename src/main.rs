//! Embedding proxy.
//!
//! A forward/reverse proxy that lets any page be embedded in an iframe.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                   EMBEDDING PROXY                    │
//!                        │                                                      │
//!   Browser request      │  ┌─────────┐   ┌─────────┐   ┌──────────────┐        │
//!   ─────────────────────┼─▶│   net   │──▶│  http   │──▶│ proxy::fetch │────────┼──▶ Upstream
//!   /proxy?url=...       │  │listener │   │ handler │   │   (reqwest)  │        │    origin
//!                        │  │ + tls   │   └─────────┘   └──────┬───────┘        │
//!                        │  └─────────┘                        │                │
//!                        │                                     ▼                │
//!   Browser response     │               ┌──────────────────────────────┐       │
//!   ◀────────────────────┼───────────────│ proxy::assemble              │◀──────┼─── response
//!                        │               │  html → decode → rewrite     │       │
//!                        │               │  else → headers only, stream │       │
//!                        │               └──────────────────────────────┘       │
//!                        │                                                      │
//!                        │  config · observability · lifecycle                  │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use embed_proxy::config::{load_config, validation::validate_config, ConfigError, ProxyConfig};
use embed_proxy::lifecycle::{signals, Shutdown};
use embed_proxy::observability::{logging, metrics};
use embed_proxy::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "embed-proxy", version, about = "Proxy that makes any page embeddable")]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn load(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    config.observability.json_logs |= cli.json_logs;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    logging::init(config.observability.json_logs);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "embed-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        routing = ?config.routing.mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    let server = HttpServer::bind(config).await?;
    server.run(shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
