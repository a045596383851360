//! On-demand sync commands

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use waterwatch_core::domain::source::SyncTarget;

use crate::config::Config;

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Queue an immediate sync
    Trigger {
        /// dws, treasury, correlation or all
        #[arg(default_value = "all")]
        source: SyncTarget,

        /// Lower runs first
        #[arg(short, long)]
        priority: Option<i32>,
    },
}

pub async fn handle_sync_command(command: SyncCommands, config: &Config) -> Result<()> {
    match command {
        SyncCommands::Trigger { source, priority } => {
            let response = config.client().trigger_sync(source, priority).await?;
            println!(
                "{} {}",
                "✓".green(),
                format!("Queued {} sync job(s) for {}", response.job_ids.len(), response.source)
                    .bold()
            );
            for id in response.job_ids {
                println!("  {} {}", "▸".cyan(), id.to_string().dimmed());
            }
            Ok(())
        }
    }
}
