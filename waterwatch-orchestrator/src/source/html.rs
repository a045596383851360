use anyhow::Context;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info};
use waterwatch_core::change::Record;

use super::{Progress, SyncSource};

/// Scrapes every data table on a single page
///
/// The first row of a table supplies the field names. Tables whose header
/// mentions none of `indicators` are skipped, as are rows with fewer cells
/// than the header.
pub struct HtmlTableSource {
    client: reqwest::Client,
    url: String,
    indicators: Vec<String>,
}

impl HtmlTableSource {
    pub fn new(client: reqwest::Client, url: String, indicators: Vec<String>) -> Self {
        Self {
            client,
            url,
            indicators,
        }
    }
}

#[async_trait]
impl SyncSource for HtmlTableSource {
    async fn fetch(&self, progress: &Progress) -> anyhow::Result<Vec<Record>> {
        progress.report(0, "requesting page");
        let html = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {} failed", self.url))?
            .text()
            .await
            .context("failed to read page body")?;

        progress.report(60, "parsing tables");
        let records = parse_tables(&html, &self.indicators)?;
        info!(url = %self.url, records = records.len(), "Scraped page");
        progress.report(100, "page parsed");
        Ok(records)
    }
}

/// Extracts one record per data row from every matching table in `html`
pub fn parse_tables(html: &str, indicators: &[String]) -> anyhow::Result<Vec<Record>> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("th, td")?;

    let mut records = Vec::new();
    for (index, table) in document.select(&table_sel).enumerate() {
        let mut rows = table.select(&row_sel);
        let Some(header_row) = rows.next() else {
            continue;
        };
        let headers: Vec<String> = header_row
            .select(&cell_sel)
            .map(|cell| field_name(&cell_text(cell)))
            .collect();

        let joined = headers.join(" ");
        if !indicators.is_empty() && !indicators.iter().any(|i| joined.contains(i.as_str())) {
            debug!(table = index, "Skipping table without data headers");
            continue;
        }

        for row in rows {
            let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
            if cells.len() < headers.len() {
                continue;
            }
            let mut record = Record::new();
            for (header, value) in headers.iter().zip(cells) {
                if header.is_empty() {
                    continue;
                }
                let value = if value.is_empty() {
                    Value::Null
                } else {
                    Value::String(value)
                };
                record.insert(header.clone(), value);
            }
            if !record.is_empty() {
                records.push(record);
            }
        }
    }
    Ok(records)
}

fn selector(s: &str) -> anyhow::Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow::anyhow!("invalid selector '{}': {:?}", s, e))
}

/// Cell text with whitespace collapsed
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"Project Name (R)"` -> `"project_name_r"`
fn field_name(header: &str) -> String {
    let mut name = String::with_capacity(header.len());
    for c in header.chars() {
        if c.is_alphanumeric() {
            name.extend(c.to_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    name.trim_matches('_').to_string()
}
