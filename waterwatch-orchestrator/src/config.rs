//! Orchestrator configuration
//!
//! All timeouts and intervals come from the environment with sensible
//! defaults, so a bare `waterwatch-orchestrator` starts with in-memory storage
//! and the public data endpoints.

use std::str::FromStr;
use std::time::Duration;
use waterwatch_core::dto::scheduler::SchedulerSettings;

use crate::queue::QueueConfig;

pub const DEFAULT_DWS_URL: &str = "https://ws.dws.gov.za/pmd/level.aspx";
pub const DEFAULT_TREASURY_URL: &str =
    "https://municipaldata.treasury.gov.za/api/cubes/municipalities/facts";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// PostgreSQL URL; in-memory storage and broker are used when unset
    pub database_url: Option<String>,

    /// Number of concurrent job workers
    pub worker_count: usize,

    /// Maximum time a job may run before the timeout sweep cancels it
    pub job_timeout: Duration,

    /// How often the timeout sweep runs
    pub job_sweep_interval: Duration,

    /// Maximum number of finished jobs kept in history
    pub job_history_limit: usize,

    /// Maximum age of a finished job kept in history
    pub job_retention: Duration,

    /// How often finished jobs are evicted
    pub job_cleanup_interval: Duration,

    pub job_max_retries: u32,

    /// Polling, backoff and maintenance timing
    pub scheduler: SchedulerSettings,

    /// Start the recurring loops at boot
    pub scheduler_autostart: bool,

    pub dws_url: String,
    pub treasury_url: String,
    pub treasury_page_size: usize,
    pub treasury_max_pages: usize,

    /// Timeout applied to every outbound source request
    pub http_timeout: Duration,
}

impl Config {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            worker_count: 3,
            job_timeout: Duration::from_secs(3600),
            job_sweep_interval: Duration::from_secs(60),
            job_history_limit: 1000,
            job_retention: Duration::from_secs(24 * 3600),
            job_cleanup_interval: Duration::from_secs(3600),
            job_max_retries: 3,
            scheduler: SchedulerSettings::default(),
            scheduler_autostart: true,
            dws_url: DEFAULT_DWS_URL.to_string(),
            treasury_url: DEFAULT_TREASURY_URL.to_string(),
            treasury_page_size: 100,
            treasury_max_pages: 50,
            http_timeout: Duration::from_secs(60),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables (all optional):
    /// - WATERWATCH_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL
    /// - WORKER_COUNT (default: 3)
    /// - JOB_TIMEOUT (seconds, default: 3600)
    /// - JOB_HISTORY_LIMIT (default: 1000)
    /// - JOB_RETENTION (seconds, default: 86400)
    /// - JOB_CLEANUP_INTERVAL (seconds, default: 3600)
    /// - JOB_MAX_RETRIES (default: 3)
    /// - DWS_POLLING_INTERVAL (seconds, default: 1800)
    /// - TREASURY_POLLING_INTERVAL (seconds, default: 3600)
    /// - CORRELATION_INTERVAL (seconds, default: 7200)
    /// - HEALTH_CHECK_INTERVAL (seconds, default: 300)
    /// - MAINTENANCE_INTERVAL (seconds, default: 3600)
    /// - BACKOFF_BASE (seconds, default: 300)
    /// - BACKOFF_MAX (seconds, default: 3600)
    /// - RESTART_THRESHOLD (default: 3)
    /// - DWS_URL, TREASURY_URL
    /// - TREASURY_PAGE_SIZE (default: 100)
    /// - TREASURY_MAX_PAGES (default: 50)
    /// - SCHEDULER_AUTOSTART (default: true)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();
        let scheduler = SchedulerSettings {
            dws_interval: env_or("DWS_POLLING_INTERVAL", defaults.scheduler.dws_interval)?,
            treasury_interval: env_or(
                "TREASURY_POLLING_INTERVAL",
                defaults.scheduler.treasury_interval,
            )?,
            correlation_interval: env_or(
                "CORRELATION_INTERVAL",
                defaults.scheduler.correlation_interval,
            )?,
            health_check_interval: env_or(
                "HEALTH_CHECK_INTERVAL",
                defaults.scheduler.health_check_interval,
            )?,
            maintenance_interval: env_or(
                "MAINTENANCE_INTERVAL",
                defaults.scheduler.maintenance_interval,
            )?,
            backoff_base: env_or("BACKOFF_BASE", defaults.scheduler.backoff_base)?,
            backoff_max: env_or("BACKOFF_MAX", defaults.scheduler.backoff_max)?,
            restart_threshold: env_or("RESTART_THRESHOLD", defaults.scheduler.restart_threshold)?,
        };

        Ok(Self {
            bind_addr: env_or("WATERWATCH_BIND_ADDR", defaults.bind_addr)?,
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count)?,
            job_timeout: Duration::from_secs(env_or(
                "JOB_TIMEOUT",
                defaults.job_timeout.as_secs(),
            )?),
            job_sweep_interval: defaults.job_sweep_interval,
            job_history_limit: env_or("JOB_HISTORY_LIMIT", defaults.job_history_limit)?,
            job_retention: Duration::from_secs(env_or(
                "JOB_RETENTION",
                defaults.job_retention.as_secs(),
            )?),
            job_cleanup_interval: Duration::from_secs(env_or(
                "JOB_CLEANUP_INTERVAL",
                defaults.job_cleanup_interval.as_secs(),
            )?),
            job_max_retries: env_or("JOB_MAX_RETRIES", defaults.job_max_retries)?,
            scheduler,
            scheduler_autostart: env_or("SCHEDULER_AUTOSTART", defaults.scheduler_autostart)?,
            dws_url: env_or("DWS_URL", defaults.dws_url)?,
            treasury_url: env_or("TREASURY_URL", defaults.treasury_url)?,
            treasury_page_size: env_or("TREASURY_PAGE_SIZE", defaults.treasury_page_size)?,
            treasury_max_pages: env_or("TREASURY_MAX_PAGES", defaults.treasury_max_pages)?,
            http_timeout: defaults.http_timeout,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.job_cleanup_interval.is_zero() {
            anyhow::bail!("job_cleanup_interval must be greater than 0");
        }

        if self.job_history_limit == 0 {
            anyhow::bail!("job_history_limit must be greater than 0");
        }

        for (name, url) in [("dws_url", &self.dws_url), ("treasury_url", &self.treasury_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.treasury_page_size == 0 || self.treasury_max_pages == 0 {
            anyhow::bail!("treasury_page_size and treasury_max_pages must be greater than 0");
        }

        self.scheduler
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid scheduler settings: {}", e))?;

        Ok(())
    }

    /// Worker pool settings derived from this configuration
    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            worker_count: self.worker_count,
            job_timeout: self.job_timeout,
            sweep_interval: self.job_sweep_interval,
            history_limit: self.job_history_limit,
            retention: self.job_retention,
            cleanup_interval: self.job_cleanup_interval,
            max_retries: self.job_max_retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `name` from the environment, falling back to `default` when unset
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {} ({})", name, raw, e)),
        _ => Ok(default),
    }
}
