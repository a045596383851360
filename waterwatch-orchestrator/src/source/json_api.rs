use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use waterwatch_core::change::Record;

use super::{Progress, SyncSource};

/// Keys under which list endpoints return their rows, in lookup order
const RECORD_KEYS: [&str; 4] = ["data", "cells", "results", "municipalities"];

/// Paginated JSON API client
///
/// Requests `?page=N&pagesize=S` starting at page 1 and stops at the first
/// empty or short page, or after `max_pages`.
pub struct JsonApiSource {
    client: reqwest::Client,
    url: String,
    page_size: usize,
    max_pages: usize,
}

impl JsonApiSource {
    pub fn new(client: reqwest::Client, url: String, page_size: usize, max_pages: usize) -> Self {
        Self {
            client,
            url,
            page_size,
            max_pages,
        }
    }

    async fn fetch_page(&self, page: usize) -> anyhow::Result<Value> {
        let page_param = page.to_string();
        let size_param = self.page_size.to_string();
        self.client
            .get(&self.url)
            .query(&[
                ("format", "json"),
                ("page", page_param.as_str()),
                ("pagesize", size_param.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {} page {} failed", self.url, page))?
            .json::<Value>()
            .await
            .with_context(|| format!("page {} is not valid JSON", page))
    }
}

#[async_trait]
impl SyncSource for JsonApiSource {
    async fn fetch(&self, progress: &Progress) -> anyhow::Result<Vec<Record>> {
        let mut records = Vec::new();

        for page in 1..=self.max_pages {
            let body = self.fetch_page(page).await?;
            let batch = extract_records(&body);
            let count = batch.len();
            records.extend(batch);

            let percent = (page * 100 / self.max_pages).min(100) as u8;
            progress.report(percent, &format!("fetched page {}", page));
            debug!(page, count, "Fetched API page");

            if count < self.page_size {
                break;
            }
        }

        info!(url = %self.url, records = records.len(), "Fetched API records");
        progress.report(100, "all pages fetched");
        Ok(records)
    }
}

/// Pulls the object rows out of one page body
///
/// Accepts a top-level array or the first array found under a known key.
/// Non-object rows are dropped.
pub fn extract_records(body: &Value) -> Vec<Record> {
    let rows = match body {
        Value::Array(rows) => Some(rows),
        Value::Object(map) => RECORD_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    };
    rows.map(|rows| {
        rows.iter()
            .filter_map(|row| row.as_object().cloned())
            .collect()
    })
    .unwrap_or_default()
}
