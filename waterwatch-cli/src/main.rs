//! Waterwatch CLI
//!
//! Command-line interface for driving the Waterwatch orchestrator.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "waterwatch")]
#[command(about = "Waterwatch ingestion orchestrator CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(long, env = "WATERWATCH_URL", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        server_url: cli.server,
    };

    handle_command(cli.command, &config).await
}
