//! Serializable ingestion configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::IngestError;

/// Configuration for one ingestion run, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Bronze landing zone root (`vendor=…/exchange=…/type=…/date=…/` layout).
    pub bronze_root: PathBuf,

    /// Silver store root (`exchange=…/date=…/` parquet partitions).
    pub silver_root: PathBuf,

    /// Symbol dimension file.
    pub dimension_path: PathBuf,

    /// Manifest ledger file (JSONL).
    pub manifest_path: PathBuf,

    /// Unmapped-symbol handling.
    #[serde(default)]
    pub quarantine: QuarantinePolicy,

    /// Worker threads for the batch run. Zero means the rayon default.
    #[serde(default)]
    pub workers: usize,

    /// Compute SHA-256 content fingerprints instead of size+mtime.
    #[serde(default)]
    pub hash_contents: bool,
}

/// What to do when a file contains rows the dimension cannot resolve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuarantinePolicy {
    /// Any unmapped row quarantines the whole file; nothing is written.
    AllOrNothing,

    /// Write the mapped rows as long as at most `max_unmapped_rows` rows
    /// are unmapped; above the threshold the file quarantines whole.
    Tolerate { max_unmapped_rows: u64 },
}

impl Default for QuarantinePolicy {
    fn default() -> Self {
        QuarantinePolicy::AllOrNothing
    }
}

impl IngestConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            IngestError::Config(format!(
                "cannot read config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| IngestError::Config(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let toml = r#"
            bronze_root = "/data/bronze"
            silver_root = "/data/silver"
            dimension_path = "/data/dim/symbols.json"
            manifest_path = "/data/manifest.jsonl"
        "#;
        let config: IngestConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.quarantine, QuarantinePolicy::AllOrNothing);
        assert_eq!(config.workers, 0);
        assert!(!config.hash_contents);
    }

    #[test]
    fn tolerate_policy_parses() {
        let toml = r#"
            bronze_root = "/data/bronze"
            silver_root = "/data/silver"
            dimension_path = "/data/dim/symbols.json"
            manifest_path = "/data/manifest.jsonl"
            workers = 4

            [quarantine]
            type = "TOLERATE"
            max_unmapped_rows = 10
        "#;
        let config: IngestConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.quarantine,
            QuarantinePolicy::Tolerate { max_unmapped_rows: 10 }
        );
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = IngestConfig {
            bronze_root: "/b".into(),
            silver_root: "/s".into(),
            dimension_path: "/d.json".into(),
            manifest_path: "/m.jsonl".into(),
            quarantine: QuarantinePolicy::Tolerate { max_unmapped_rows: 3 },
            workers: 2,
            hash_contents: true,
        };
        let text = toml::to_string(&config).unwrap();
        let back: IngestConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = IngestConfig::load("/nonexistent/argent.toml").unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
