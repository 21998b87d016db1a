//! Dynamic reverse proxy
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────┐
//!     ───────────────────▶│  http server ─▶ proxy handler ─▶ transport ──┼──▶ Target
//!                         │                  │       │                   │
//!                         │          routing table   shutdown            │
//!                         │          (ArcSwap)       coordinator         │
//!                         │              ▲                               │
//!                         │     config watcher                           │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use dynamic_proxy::config::{load_config, ProxyConfig};
use dynamic_proxy::lifecycle::startup;
use dynamic_proxy::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "dynamic-proxy", version, about = "Dynamic HTTP reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    init_logging(level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        "dynamic-proxy starting"
    );

    startup::run(config, cli.config).await?;
    Ok(())
}
