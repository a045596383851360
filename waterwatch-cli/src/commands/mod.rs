//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod scheduler;
mod sync;

pub use job::JobCommands;
pub use scheduler::SchedulerCommands;
pub use sync::SyncCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check that the orchestrator is up
    Health,
    /// Recurring loop control
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },
    /// On-demand syncs
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Health => health(config).await,
        Commands::Scheduler { command } => {
            scheduler::handle_scheduler_command(command, config).await
        }
        Commands::Sync { command } => sync::handle_sync_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
    }
}

async fn health(config: &Config) -> Result<()> {
    let report = config.client().health().await?;

    println!("{} {}", "✓".green(), format!("Orchestrator is {}", report.status).bold());
    println!(
        "  Scheduler:   {}",
        if report.scheduler_running {
            "running".green()
        } else {
            "stopped".yellow()
        }
    );
    println!("  Queue depth: {}", report.queue_depth);
    println!("  Workers:     {} active", report.active_workers);
    println!("  WebSockets:  {}", report.connections);
    Ok(())
}
