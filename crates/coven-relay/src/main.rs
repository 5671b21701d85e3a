// ABOUTME: Entry point for the coven-relay binary.
// ABOUTME: Loads config, connects to Slack, listens for the agent, runs until shutdown.

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "coven-relay")]
#[command(about = "Relay Slack threads to a single-flight automation agent")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "COVEN_RELAY_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log relay internals at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    coven_relay_log::init_for(
        &["coven_relay", "coven_relay_proto"],
        coven_relay_log::level_for(cli.verbose),
    );

    coven_relay::run(cli.config).await
}
