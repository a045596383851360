//! Scheduler command handlers

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use colored::*;
use waterwatch_core::domain::health::{LoopHealth, LoopStatus};
use waterwatch_core::dto::scheduler::{SchedulerConfigUpdate, SchedulerSettings};

use crate::config::Config;

/// Scheduler subcommands
#[derive(Subcommand)]
pub enum SchedulerCommands {
    /// Start the recurring loops
    Start,
    /// Stop the recurring loops
    Stop,
    /// Show loop health and current timing
    Status,
    /// Change timing; only the given values are updated
    Config(ConfigArgs),
}

/// Timing overrides, all in seconds
#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    dws_interval: Option<u64>,
    #[arg(long)]
    treasury_interval: Option<u64>,
    #[arg(long)]
    correlation_interval: Option<u64>,
    #[arg(long)]
    health_check_interval: Option<u64>,
    #[arg(long)]
    maintenance_interval: Option<u64>,
    #[arg(long)]
    backoff_base: Option<u64>,
    #[arg(long)]
    backoff_max: Option<u64>,
    /// Consecutive errors tolerated before a loop is restarted
    #[arg(long)]
    restart_threshold: Option<u32>,
}

impl From<ConfigArgs> for SchedulerConfigUpdate {
    fn from(args: ConfigArgs) -> Self {
        SchedulerConfigUpdate {
            dws_interval: args.dws_interval,
            treasury_interval: args.treasury_interval,
            correlation_interval: args.correlation_interval,
            health_check_interval: args.health_check_interval,
            maintenance_interval: args.maintenance_interval,
            backoff_base: args.backoff_base,
            backoff_max: args.backoff_max,
            restart_threshold: args.restart_threshold,
        }
    }
}

pub async fn handle_scheduler_command(command: SchedulerCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        SchedulerCommands::Start => {
            let toggle = client.start_scheduler().await?;
            if toggle.changed {
                println!("{} {}", "✓".green(), "Scheduler started".bold());
            } else {
                println!("{}", "Scheduler is already running.".yellow());
            }
        }
        SchedulerCommands::Stop => {
            let toggle = client.stop_scheduler().await?;
            if toggle.changed {
                println!("{} {}", "✓".green(), "Scheduler stopped".bold());
            } else {
                println!("{}", "Scheduler is not running.".yellow());
            }
        }
        SchedulerCommands::Status => {
            let status = client.scheduler_status().await?;
            let state = if status.running {
                "running".green()
            } else {
                "stopped".yellow()
            };
            println!("{} {}", "Scheduler:".bold(), state);
            if let Some(uptime) = status.uptime_secs {
                println!("  Uptime:       {}s", uptime);
            }
            println!("  Total errors: {}", status.total_errors);
            println!();
            for health in &status.sources {
                print_loop_health(health);
            }
            print_settings(&status.config);
        }
        SchedulerCommands::Config(args) => {
            let update = SchedulerConfigUpdate::from(args);
            if is_empty(&update) {
                bail!("Nothing to update; pass at least one --<setting>");
            }
            let settings = client.update_scheduler_config(&update).await?;
            println!("{} {}", "✓".green(), "Scheduler configuration updated".bold());
            print_settings(&settings);
        }
    }

    Ok(())
}

fn is_empty(update: &SchedulerConfigUpdate) -> bool {
    serde_json::to_value(update)
        .map(|v| v.as_object().is_some_and(|o| o.is_empty()))
        .unwrap_or(true)
}

fn print_loop_health(health: &LoopHealth) {
    let status = health.status.to_string();
    let status = match health.status {
        LoopStatus::Healthy => status.green(),
        LoopStatus::Running => status.cyan(),
        LoopStatus::Stale => status.yellow(),
        LoopStatus::Error => status.red(),
        LoopStatus::Stopped => status.dimmed(),
    };

    println!("  {} {} [{}]", "▸".cyan(), health.source.to_string().bold(), status);
    if let Some(at) = health.last_success {
        println!("    Last success: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(at) = health.next_run_at {
        println!("    Next run:     {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if health.consecutive_errors > 0 {
        println!(
            "    Errors:       {} consecutive, {} total",
            health.consecutive_errors, health.total_errors
        );
    }
    if let Some(error) = &health.last_error {
        println!("    Last error:   {}", error.red());
    }
    if health.restarts > 0 {
        println!("    Restarts:     {}", health.restarts);
    }
    println!();
}

fn print_settings(settings: &SchedulerSettings) {
    println!("{}", "Timing (seconds):".bold());
    println!("  dws_interval          = {}", settings.dws_interval);
    println!("  treasury_interval     = {}", settings.treasury_interval);
    println!("  correlation_interval  = {}", settings.correlation_interval);
    println!("  health_check_interval = {}", settings.health_check_interval);
    println!("  maintenance_interval  = {}", settings.maintenance_interval);
    println!("  backoff_base          = {}", settings.backoff_base);
    println!("  backoff_max           = {}", settings.backoff_max);
    println!("  restart_threshold     = {}", settings.restart_threshold);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update_detected() {
        assert!(is_empty(&SchedulerConfigUpdate::default()));
        let update = SchedulerConfigUpdate {
            backoff_max: Some(600),
            ..Default::default()
        };
        assert!(!is_empty(&update));
    }
}
