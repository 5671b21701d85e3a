// ABOUTME: Entry point for the coven-relay-agent binary.
// ABOUTME: Loads config, connects to the relay and processes prompts until shutdown.

use anyhow::Result;
use clap::Parser;
use coven_relay_agent::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "coven-relay-agent")]
#[command(about = "Single-flight automation agent for coven-relay")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "COVEN_RELAY_AGENT_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Relay WebSocket URL (overrides relay.url)
    #[arg(short, long, env = "COVEN_RELAY_URL")]
    url: Option<String>,

    /// Log agent internals at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    coven_relay_log::init_for(
        &["coven_relay_agent", "coven_relay_proto"],
        coven_relay_log::level_for(cli.verbose),
    );

    let mut config = Config::load(cli.config)?;
    if let Some(url) = cli.url {
        config.set_relay_url(url)?;
    }
    info!(url = %config.relay.url, "coven-relay-agent starting");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    coven_relay_agent::run_simulated(&config, cancel).await?;
    info!("coven-relay-agent stopped");
    Ok(())
}
