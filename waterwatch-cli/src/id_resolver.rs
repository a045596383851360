//! ID resolver module
//!
//! Resolves job id prefixes against the orchestrator's recent job list, so
//! users can type a short unambiguous prefix instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use uuid::Uuid;
use waterwatch_client::WaterwatchClient;

use crate::types::IdOrPrefix;

/// How many recent jobs are searched for a prefix match
const RESOLVE_WINDOW: usize = 1000;

/// Resolve a job ID or prefix to a full UUID
///
/// Full UUIDs are returned as is, without a request.
///
/// # Errors
/// Fails when no recent job matches, when several do, or when the API call fails
pub async fn resolve_job_id(client: &WaterwatchClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let jobs = client
        .list_jobs(Some(RESOLVE_WINDOW))
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| j.id), prefix)
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
