//! Job command handlers
//!
//! Submission, listing, inspection, cancellation and retry of worker-pool jobs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use waterwatch_client::WaterwatchClient;
use waterwatch_core::domain::job::{Job, JobKind, JobStatus};
use waterwatch_core::dto::job::SubmitJob;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a job
    Submit {
        /// dws_sync, treasury_sync or correlation_analysis
        kind: JobKind,

        /// Lower runs first
        #[arg(short, long)]
        priority: Option<i32>,

        /// Job parameter as key=value; values are parsed as JSON when possible
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, JsonValue)>,
    },
    /// List active and recent jobs
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Cancel a pending or running job
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Retry a failed job
    Retry {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Show processing metrics
    Metrics,
}

pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Submit {
            kind,
            priority,
            params,
        } => {
            let request = SubmitJob {
                kind,
                parameters: params.into_iter().collect::<HashMap<_, _>>(),
                priority,
            };
            let job = client.submit_job(&request).await?;
            println!("{} {}", "✓".green(), "Job submitted".bold());
            print_job_details(&job);
        }
        JobCommands::List { limit } => {
            let jobs = client.list_jobs(limit).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs found.".yellow());
            } else {
                println!("{}", format!("Found {} job(s):", jobs.len()).bold());
                println!();
                for job in jobs {
                    print_job_summary(&job);
                }
            }
        }
        JobCommands::Get { id } => {
            let job = client.get_job(resolve(&client, &id).await?).await?;
            print_job_details(&job);
        }
        JobCommands::Cancel { id } => {
            let job = client.cancel_job(resolve(&client, &id).await?).await?;
            println!("{} {}", "✓".green(), format!("Job {} cancelled", job.id).bold());
        }
        JobCommands::Retry { id } => {
            let job = client.retry_job(resolve(&client, &id).await?).await?;
            println!(
                "{} {}",
                "✓".green(),
                format!("Retry queued as {} (attempt {})", job.id, job.retry_count).bold()
            );
        }
        JobCommands::Metrics => {
            let m = client.job_metrics().await?;
            println!("{}", "Job Metrics:".bold());
            println!("  Processed:   {}", m.total_processed);
            println!("  Succeeded:   {}", m.succeeded.to_string().green());
            println!("  Failed:      {}", m.failed.to_string().red());
            println!("  Cancelled:   {}", m.cancelled.to_string().dimmed());
            println!("  Success:     {:.1}%", m.success_rate * 100.0);
            println!("  Avg time:    {:.2}s", m.average_processing_secs);
            println!("  Queue depth: {}", m.queue_depth);
            println!("  Workers:     {}/{} busy", m.active_workers, m.worker_count);
        }
    }

    Ok(())
}

async fn resolve(client: &WaterwatchClient, id: &str) -> Result<uuid::Uuid> {
    resolve_job_id(client, &IdOrPrefix::parse(id)).await
}

fn parse_param(raw: &str) -> std::result::Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_job_summary(job: &Job) {
    println!("  {} Job {}", "▸".cyan(), job.id.to_string().dimmed());
    println!("    Kind:     {}", job.kind);
    println!("    Status:   {}", colorize_status(&job.status));
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if job.status == JobStatus::Running {
        println!("    Progress: {}%", job.progress);
    }
    println!();
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Kind:      {}", job.kind);
    println!("  Source:    {}", job.source);
    println!("  Status:    {}", colorize_status(&job.status));
    println!("  Priority:  {}", job.priority);
    println!("  Progress:  {}%", job.progress);
    if let Some(message) = &job.progress_message {
        println!("  Step:      {}", message.dimmed());
    }
    println!("  Created:   {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = job.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }
    if job.retry_count > 0 {
        println!("  Retry:     {}/{}", job.retry_count, job.max_retries);
    }
    if let Some(original) = job.retry_of {
        println!("  Retry of:  {}", original.to_string().dimmed());
    }

    if !job.parameters.is_empty() {
        println!("\n{}", "Parameters:".bold());
        for (key, value) in &job.parameters {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        match serde_json::to_string_pretty(result) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{:?}", result),
        }
    }

    if let Some(error) = &job.error_message {
        println!("\n{}", "Error:".bold());
        match &job.error_phase {
            Some(phase) => println!("{} {}", format!("[{}]", phase).dimmed(), error.red()),
            None => println!("{}", error.red()),
        }
    }
}

fn colorize_status(status: &JobStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        JobStatus::Pending => text.yellow(),
        JobStatus::Running => text.cyan(),
        JobStatus::Succeeded => text.green(),
        JobStatus::Failed => text.red(),
        JobStatus::Cancelled => text.dimmed(),
    }
}
