//! Run summaries returned by the batch orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

use argent_core::dimension::Scd2Stats;
use argent_core::domain::FileId;

use crate::manifest::ManifestKey;

/// How one file ended up, including the skip cases that never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Success,
    Failed,
    Quarantined,
    SkippedAlreadySucceeded,
    SkippedQuarantined,
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOutcome::Success => "success",
            FileOutcome::Failed => "failed",
            FileOutcome::Quarantined => "quarantined",
            FileOutcome::SkippedAlreadySucceeded => "skipped (already succeeded)",
            FileOutcome::SkippedQuarantined => "skipped (quarantined)",
        };
        f.write_str(s)
    }
}

/// Per-file line of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub key: ManifestKey,
    pub file_id: Option<FileId>,
    pub outcome: FileOutcome,
    pub row_count: u64,
    pub quarantined_rows: u64,
    pub error_message: Option<String>,
    pub scd2: Option<Scd2Stats>,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn count(&self, outcome: &FileOutcome) -> usize {
        self.files.iter().filter(|f| &f.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(&FileOutcome::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(&FileOutcome::Failed)
    }

    pub fn quarantined(&self) -> usize {
        self.count(&FileOutcome::Quarantined)
    }

    pub fn skipped(&self) -> usize {
        self.count(&FileOutcome::SkippedAlreadySucceeded)
            + self.count(&FileOutcome::SkippedQuarantined)
    }

    pub fn total_rows(&self) -> u64 {
        self.files.iter().map(|f| f.row_count).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} succeeded, {} failed, {} quarantined, {} skipped ({} rows)",
            self.files.len(),
            self.succeeded(),
            self.failed(),
            self.quarantined(),
            self.skipped(),
            self.total_rows()
        )
    }
}
