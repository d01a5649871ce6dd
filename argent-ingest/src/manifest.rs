//! Manifest repository — the idempotency ledger.
//!
//! One entry per Bronze file key. Entries are created `Pending` on first
//! discovery, move to a terminal status after one processing attempt, and
//! are never deleted. The ledger is an append-only JSONL file (one JSON
//! object per line, last entry for a key wins on reload, malformed lines
//! skipped) so a crash mid-run can at worst lose the tail line — the
//! affected file simply re-runs.
//!
//! The repository is injected into the pipeline, never reached as a global.
//! Per-key in-flight locking serializes concurrent attempts on the same
//! file; distinct files proceed in parallel freely.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use argent_core::bronze::Fingerprint;
use argent_core::dimension::Scd2Stats;
use argent_core::domain::FileId;
use argent_core::vendor::DataType;

/// Natural key of a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestKey {
    pub vendor: String,
    pub data_type: DataType,
    pub exchange: String,
    pub date: NaiveDate,
    pub bronze_file_name: String,
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.vendor, self.exchange, self.data_type, self.date, self.bronze_file_name
        )
    }
}

/// Processing status of one file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Success,
    Failed,
    /// Valid but unmapped by the current dimension policy — not malformed.
    Quarantined,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Quarantined => "quarantined",
        };
        f.write_str(s)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: ManifestKey,
    /// Surrogate id, stable once assigned on the key's first `begin`.
    pub file_id: FileId,
    pub fingerprint: Fingerprint,
    pub status: Status,
    pub row_count: u64,
    pub quarantined_rows: u64,
    pub ts_local_min_us: Option<i64>,
    pub ts_local_max_us: Option<i64>,
    pub error_message: Option<String>,
    /// Dimension audit counters when this file drove dimension changes.
    pub scd2: Option<Scd2Stats>,
    pub attempted_at: NaiveDateTime,
}

/// Retry knobs for the skip decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// Reprocess even a matching `Success` entry.
    pub force: bool,
    /// Reprocess `Quarantined` entries (normally skipped).
    pub retry_quarantined: bool,
}

/// What to do with a discovered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Process,
    SkipAlreadySucceeded,
    SkipQuarantined,
}

/// Terminal result of one processing attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: Status,
    pub row_count: u64,
    pub quarantined_rows: u64,
    pub ts_local_min_us: Option<i64>,
    pub ts_local_max_us: Option<i64>,
    pub error_message: Option<String>,
    pub scd2: Option<Scd2Stats>,
}

impl Outcome {
    pub fn success(row_count: u64, ts_min: i64, ts_max: i64) -> Self {
        Self {
            status: Status::Success,
            row_count,
            quarantined_rows: 0,
            ts_local_min_us: Some(ts_min),
            ts_local_max_us: Some(ts_max),
            error_message: None,
            scd2: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            row_count: 0,
            quarantined_rows: 0,
            ts_local_min_us: None,
            ts_local_max_us: None,
            error_message: Some(message.into()),
            scd2: None,
        }
    }

    pub fn quarantined(total_rows: u64, unmapped_rows: u64) -> Self {
        Self {
            status: Status::Quarantined,
            row_count: total_rows,
            quarantined_rows: unmapped_rows,
            ts_local_min_us: None,
            ts_local_max_us: None,
            error_message: None,
            scd2: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("file {0} is already being processed by another worker")]
    AlreadyInFlight(ManifestKey),

    #[error("outcome recorded for file {0} with no in-flight attempt")]
    NotInFlight(ManifestKey),
}

/// The idempotency ledger interface the pipeline is parameterized over.
pub trait ManifestRepository: Send + Sync {
    fn lookup(&self, key: &ManifestKey) -> Option<ManifestEntry>;

    /// The skip rule: process unless a `Success` entry with a matching
    /// fingerprint exists; `force` overrides; `Quarantined` is retried only
    /// on explicit request. `Failed`/`Pending` always reprocess — absence of
    /// success is sufficient, fingerprint changes are irrelevant there.
    fn should_process(
        &self,
        key: &ManifestKey,
        candidate: &Fingerprint,
        policy: &RetryPolicy,
    ) -> Decision {
        let Some(entry) = self.lookup(key) else {
            return Decision::Process;
        };
        if policy.force {
            return Decision::Process;
        }
        match entry.status {
            Status::Success if entry.fingerprint.matches(candidate) => {
                Decision::SkipAlreadySucceeded
            }
            Status::Quarantined if !policy.retry_quarantined => Decision::SkipQuarantined,
            _ => Decision::Process,
        }
    }

    /// Register a `Pending` attempt and take the per-key single-writer lock.
    /// Assigns the key's stable `file_id` on first sight.
    fn begin(&self, key: &ManifestKey, fingerprint: &Fingerprint)
        -> Result<FileId, ManifestError>;

    /// Record the terminal status of the in-flight attempt and release the
    /// per-key lock.
    fn record_outcome(&self, key: &ManifestKey, outcome: Outcome) -> Result<(), ManifestError>;

    fn status_counts(&self) -> BTreeMap<Status, usize>;
}

struct ManifestState {
    index: HashMap<ManifestKey, ManifestEntry>,
    in_flight: HashSet<ManifestKey>,
    next_file_id: u64,
}

/// JSONL-backed manifest.
pub struct JsonlManifest {
    path: PathBuf,
    state: Mutex<ManifestState>,
}

impl JsonlManifest {
    /// Open (or create) the ledger at `path`, replaying existing lines.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let path = path.into();
        let mut index: HashMap<ManifestKey, ManifestEntry> = HashMap::new();
        let mut next_file_id = 0u64;

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                // Last entry for a key wins; a torn tail line is skipped.
                match serde_json::from_str::<ManifestEntry>(line) {
                    Ok(entry) => {
                        next_file_id = next_file_id.max(entry.file_id.0 + 1);
                        index.insert(entry.key.clone(), entry);
                    }
                    Err(_) => continue,
                }
            }
        }

        Ok(Self {
            path,
            state: Mutex::new(ManifestState {
                index,
                in_flight: HashSet::new(),
                next_file_id,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&self, entry: &ManifestEntry) -> Result<(), ManifestError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()?;
        Ok(())
    }
}

impl ManifestRepository for JsonlManifest {
    fn lookup(&self, key: &ManifestKey) -> Option<ManifestEntry> {
        let state = self.state.lock().expect("manifest mutex poisoned");
        state.index.get(key).cloned()
    }

    fn begin(
        &self,
        key: &ManifestKey,
        fingerprint: &Fingerprint,
    ) -> Result<FileId, ManifestError> {
        let mut state = self.state.lock().expect("manifest mutex poisoned");
        if state.in_flight.contains(key) {
            return Err(ManifestError::AlreadyInFlight(key.clone()));
        }

        let file_id = match state.index.get(key) {
            Some(existing) => existing.file_id,
            None => {
                let id = FileId(state.next_file_id);
                state.next_file_id += 1;
                id
            }
        };

        let entry = ManifestEntry {
            key: key.clone(),
            file_id,
            fingerprint: fingerprint.clone(),
            status: Status::Pending,
            row_count: 0,
            quarantined_rows: 0,
            ts_local_min_us: None,
            ts_local_max_us: None,
            error_message: None,
            scd2: None,
            attempted_at: chrono::Local::now().naive_local(),
        };
        self.append_line(&entry)?;
        state.index.insert(key.clone(), entry);
        state.in_flight.insert(key.clone());
        Ok(file_id)
    }

    fn record_outcome(&self, key: &ManifestKey, outcome: Outcome) -> Result<(), ManifestError> {
        let mut state = self.state.lock().expect("manifest mutex poisoned");
        if !state.in_flight.remove(key) {
            return Err(ManifestError::NotInFlight(key.clone()));
        }
        let entry = state
            .index
            .get_mut(key)
            .ok_or_else(|| ManifestError::NotInFlight(key.clone()))?;
        entry.status = outcome.status;
        entry.row_count = outcome.row_count;
        entry.quarantined_rows = outcome.quarantined_rows;
        entry.ts_local_min_us = outcome.ts_local_min_us;
        entry.ts_local_max_us = outcome.ts_local_max_us;
        entry.error_message = outcome.error_message;
        entry.scd2 = outcome.scd2;
        entry.attempted_at = chrono::Local::now().naive_local();
        let entry = entry.clone();
        self.append_line(&entry)?;
        Ok(())
    }

    fn status_counts(&self) -> BTreeMap<Status, usize> {
        let state = self.state.lock().expect("manifest mutex poisoned");
        let mut counts = BTreeMap::new();
        for entry in state.index.values() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }
}
