use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use waterwatch_core::change::Record;

use super::{Progress, SyncSource};
use crate::storage::{Storage, StoredRecord};

/// Derives per-municipality summaries from stored project records
///
/// Reads only persisted data. Output records go through change detection like
/// any other source, so summaries are rewritten only when their inputs move.
pub struct CorrelationSource {
    storage: Arc<dyn Storage>,
    project_type: String,
}

impl CorrelationSource {
    pub fn new(storage: Arc<dyn Storage>, project_type: impl Into<String>) -> Self {
        Self {
            storage,
            project_type: project_type.into(),
        }
    }
}

#[async_trait]
impl SyncSource for CorrelationSource {
    async fn fetch(&self, progress: &Progress) -> anyhow::Result<Vec<Record>> {
        progress.report(0, "loading projects");
        let projects = self.storage.list(&self.project_type).await?;
        progress.report(50, "aggregating");
        let summaries = summarize(&projects);
        progress.report(100, "aggregated");
        Ok(summaries)
    }
}

#[derive(Default)]
struct Summary {
    project_count: u64,
    total_budget: f64,
    budgeted_projects: u64,
    statuses: BTreeMap<String, u64>,
}

/// One summary record per municipality named by the projects
pub fn summarize(projects: &[StoredRecord]) -> Vec<Record> {
    let mut groups: BTreeMap<String, Summary> = BTreeMap::new();

    for project in projects {
        let Some(municipality) = project
            .data
            .get("municipality")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
        else {
            continue;
        };
        let summary = groups.entry(municipality.to_string()).or_default();
        summary.project_count += 1;

        if let Some(budget) = project
            .data
            .iter()
            .find(|(k, _)| k.starts_with("budget"))
            .and_then(|(_, v)| parse_amount(v))
        {
            summary.total_budget += budget;
            summary.budgeted_projects += 1;
        }

        if let Some(status) = project.data.get("status").and_then(Value::as_str) {
            *summary
                .statuses
                .entry(status.trim().to_lowercase())
                .or_default() += 1;
        }
    }

    groups
        .into_iter()
        .map(|(municipality, summary)| {
            let mut record = Record::new();
            record.insert("municipality".into(), json!(municipality));
            record.insert("project_count".into(), json!(summary.project_count));
            record.insert("budgeted_projects".into(), json!(summary.budgeted_projects));
            // cents precision keeps the fingerprint stable across float noise
            let total = (summary.total_budget * 100.0).round() / 100.0;
            record.insert("total_budget".into(), json!(total));
            record.insert("statuses".into(), json!(summary.statuses));
            record
        })
        .collect()
}

/// Parses amounts such as `12.5`, `"R 1,200,000.50"` or `"1 200"`
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use waterwatch_core::change::fingerprint;
    use waterwatch_core::domain::source::SourceId;

    fn project(id: &str, data: Value) -> StoredRecord {
        let data = data.as_object().cloned().unwrap();
        StoredRecord {
            entity_type: "project".into(),
            entity_id: id.into(),
            fingerprint: fingerprint(&data),
            data,
            source: SourceId::Dws,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summarize_groups_by_municipality() {
        let projects = vec![
            project("a", json!({"municipality": "Cape Town", "budget_r": "R 1,000.50", "status": "Construction"})),
            project("b", json!({"municipality": "Cape Town", "budget": 500, "status": "construction"})),
            project("c", json!({"municipality": "Giyani", "status": "Planning"})),
            project("d", json!({"name": "orphan"})),
        ];
        let summaries = summarize(&projects);

        assert_eq!(summaries.len(), 2);
        let cape = &summaries[0];
        assert_eq!(cape["municipality"], json!("Cape Town"));
        assert_eq!(cape["project_count"], json!(2));
        assert_eq!(cape["total_budget"], json!(1500.5));
        assert_eq!(cape["statuses"]["construction"], json!(2));
        assert_eq!(summaries[1]["budgeted_projects"], json!(0));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&json!("R 1,200,000")), Some(1_200_000.0));
        assert_eq!(parse_amount(&json!(3)), Some(3.0));
        assert_eq!(parse_amount(&json!("n/a")), None);
        assert_eq!(parse_amount(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_fetch_reads_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .upsert(project("a", json!({"municipality": "Mbombela"})))
            .await
            .unwrap();
        let source = CorrelationSource::new(storage, "project");
        let records = source.fetch(&Progress::noop()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["project_count"], json!(1));
    }
}
