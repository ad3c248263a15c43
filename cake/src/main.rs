mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cake_core::{bootstrap::load_config, logging};
use server::CakeServer;

/// Cake demo server with a live audit relay
#[derive(Debug, Parser)]
#[command(name = "cake", version, about)]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    info!("Cake server starting...");
    info!("HTTP address: {}", config.http_address());
    info!(
        broker = config.broker.kind.as_str(),
        destination = %config.broker.destination,
        "Audit broker configured"
    );

    // 3. Run until a shutdown signal
    CakeServer::new(config).start().await
}
