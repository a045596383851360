//! Source sync collaborators
//!
//! A [`SyncSource`] turns one external system into a list of records. Sources
//! know nothing about change detection or storage; they must be safe to call
//! again after a failure.

mod correlation;
mod fixed;
mod html;
mod json_api;

pub use correlation::CorrelationSource;
pub use fixed::StaticSource;
pub use html::HtmlTableSource;
pub use json_api::JsonApiSource;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use waterwatch_core::change::{Record, record_key};
use waterwatch_core::domain::source::SourceId;

use crate::config::Config;

#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Fetches the current records, reporting progress as it goes
    async fn fetch(&self, progress: &Progress) -> anyhow::Result<Vec<Record>>;
}

/// How records from one source are identified and compared
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub id: SourceId,
    /// Entity type assigned to every record
    pub entity_type: String,
    /// Fields whose values, joined with `:`, form the entity id
    pub key_fields: Vec<String>,
    /// Volatile fields excluded from fingerprints and diffs
    pub ignore_fields: Vec<String>,
}

impl SourceSpec {
    pub fn dws() -> Self {
        Self {
            id: SourceId::Dws,
            entity_type: "project".to_string(),
            key_fields: vec!["project_name".to_string()],
            ignore_fields: vec!["last_updated".to_string()],
        }
    }

    pub fn treasury() -> Self {
        Self {
            id: SourceId::Treasury,
            entity_type: "municipality".to_string(),
            key_fields: vec!["municipality.demarcation_code".to_string()],
            ignore_fields: vec!["last_updated".to_string()],
        }
    }

    pub fn correlation() -> Self {
        Self {
            id: SourceId::Correlation,
            entity_type: "municipality_summary".to_string(),
            key_fields: vec!["municipality".to_string()],
            ignore_fields: Vec::new(),
        }
    }

    /// Entity id of `record`, or `None` when any key field is missing
    pub fn entity_id(&self, record: &Record) -> Option<String> {
        let parts: Option<Vec<String>> = self
            .key_fields
            .iter()
            .map(|field| record_key(record, field))
            .collect();
        parts
            .filter(|parts| !parts.is_empty())
            .map(|parts| parts.join(":"))
    }
}

/// Progress callback handed to long-running work
///
/// Cloning is cheap. [`Progress::scaled`] maps a sub-step's 0-100 onto a
/// slice of the parent's range.
#[derive(Clone)]
pub struct Progress {
    report: Option<Arc<dyn Fn(u8, &str) + Send + Sync>>,
    start: u8,
    end: u8,
}

impl Progress {
    pub fn new(report: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self {
            report: Some(Arc::new(report)),
            start: 0,
            end: 100,
        }
    }

    pub fn noop() -> Self {
        Self {
            report: None,
            start: 0,
            end: 100,
        }
    }

    pub fn report(&self, percent: u8, message: &str) {
        if let Some(report) = &self.report {
            let percent = u32::from(percent.min(100));
            let span = u32::from(self.end - self.start);
            let scaled = u32::from(self.start) + span * percent / 100;
            report(scaled as u8, message);
        }
    }

    pub fn scaled(&self, start: u8, end: u8) -> Progress {
        let span = u32::from(self.end - self.start);
        let map = |p: u8| (u32::from(self.start) + span * u32::from(p.min(100)) / 100) as u8;
        let (start, end) = (map(start), map(end.max(start)));
        Progress {
            report: self.report.clone(),
            start,
            end,
        }
    }
}

/// The three sources wired from configuration
pub struct SourceSet {
    pub dws: Arc<dyn SyncSource>,
    pub treasury: Arc<dyn SyncSource>,
    pub correlation: Arc<dyn SyncSource>,
}

/// Builds the HTTP client shared by the network sources
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("waterwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

impl SourceSet {
    /// Network sources from `config`; correlation reads back from `storage`
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn crate::storage::Storage>,
    ) -> anyhow::Result<Self> {
        let client = http_client(config.http_timeout)?;
        Ok(Self {
            dws: Arc::new(HtmlTableSource::new(
                client.clone(),
                config.dws_url.clone(),
                vec![
                    "project".to_string(),
                    "status".to_string(),
                    "budget".to_string(),
                ],
            )),
            treasury: Arc::new(JsonApiSource::new(
                client,
                config.treasury_url.clone(),
                config.treasury_page_size,
                config.treasury_max_pages,
            )),
            correlation: Arc::new(CorrelationSource::new(storage, "project")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entity_id_single_and_composite() {
        let spec = SourceSpec::dws();
        assert_eq!(
            spec.entity_id(&record(json!({"project_name": "Dam A"}))).as_deref(),
            Some("Dam A")
        );
        assert_eq!(spec.entity_id(&record(json!({"name": "Dam A"}))), None);

        let composite = SourceSpec {
            key_fields: vec!["code".into(), "year".into()],
            ..SourceSpec::treasury()
        };
        assert_eq!(
            composite
                .entity_id(&record(json!({"code": "CPT", "year": 2024})))
                .as_deref(),
            Some("CPT:2024")
        );
        assert_eq!(composite.entity_id(&record(json!({"code": "CPT"}))), None);
    }

    #[test]
    fn test_progress_scaling() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(move |p, _| sink.lock().push(p));

        progress.report(10, "start");
        let fetch = progress.scaled(0, 50);
        fetch.report(50, "half of fetch");
        fetch.report(100, "fetched");
        let nested = fetch.scaled(50, 100);
        nested.report(0, "nested start");

        assert_eq!(*seen.lock(), vec![10, 25, 50, 25]);
        Progress::noop().report(50, "ignored");
    }
}
