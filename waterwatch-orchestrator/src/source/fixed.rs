use async_trait::async_trait;
use parking_lot::RwLock;
use waterwatch_core::change::Record;

use super::{Progress, SyncSource};

/// Serves whatever records it currently holds
///
/// Stands in for a network source in offline runs and tests.
#[derive(Default)]
pub struct StaticSource {
    records: RwLock<Vec<Record>>,
}

impl StaticSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn set_records(&self, records: Vec<Record>) {
        *self.records.write() = records;
    }
}

#[async_trait]
impl SyncSource for StaticSource {
    async fn fetch(&self, progress: &Progress) -> anyhow::Result<Vec<Record>> {
        let records = self.records.read().clone();
        progress.report(100, "records loaded");
        Ok(records)
    }
}
