//! Data source identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A polled data source
///
/// Each source owns one recurring loop in the scheduler and maps to exactly
/// one job kind in the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Project monitoring dashboard (HTML scraping)
    Dws,
    /// Municipal finance API (paginated JSON)
    Treasury,
    /// Correlation pass over already-persisted data
    Correlation,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Dws, SourceId::Treasury, SourceId::Correlation];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Dws => "dws",
            SourceId::Treasury => "treasury",
            SourceId::Correlation => "correlation",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dws" => Ok(SourceId::Dws),
            "treasury" => Ok(SourceId::Treasury),
            "correlation" => Ok(SourceId::Correlation),
            other => Err(format!(
                "unknown source '{}' (expected one of: dws, treasury, correlation)",
                other
            )),
        }
    }
}

/// Target of an on-demand sync: every source, or a single one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SyncTarget {
    All,
    Source(SourceId),
}

impl SyncTarget {
    pub fn sources(&self) -> Vec<SourceId> {
        match self {
            SyncTarget::All => SourceId::ALL.to_vec(),
            SyncTarget::Source(source) => vec![*source],
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::All => f.write_str("all"),
            SyncTarget::Source(source) => source.fmt(f),
        }
    }
}

impl FromStr for SyncTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SyncTarget::All),
            other => other.parse().map(SyncTarget::Source),
        }
    }
}

impl TryFrom<String> for SyncTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SyncTarget> for String {
    fn from(target: SyncTarget) -> Self {
        target.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_roundtrip_names() {
        for source in SourceId::ALL {
            assert_eq!(source.as_str().parse::<SourceId>().unwrap(), source);
        }
        assert!("ftp".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_sync_target_parsing() {
        assert_eq!("all".parse::<SyncTarget>().unwrap(), SyncTarget::All);
        assert_eq!(
            "treasury".parse::<SyncTarget>().unwrap(),
            SyncTarget::Source(SourceId::Treasury)
        );
        assert_eq!(SyncTarget::All.sources().len(), 3);
    }

    #[test]
    fn test_sync_target_serde() {
        let target: SyncTarget = serde_json::from_str("\"dws\"").unwrap();
        assert_eq!(target, SyncTarget::Source(SourceId::Dws));
        assert_eq!(serde_json::to_string(&SyncTarget::All).unwrap(), "\"all\"");
        assert!(serde_json::from_str::<SyncTarget>("\"nope\"").is_err());
    }
}
