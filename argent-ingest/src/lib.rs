//! Argent Ingest — the Bronze→Silver orchestration layer.
//!
//! - Manifest repository: the idempotency ledger deciding what to (re)process
//! - Per-file pipeline: parse → resolve/quarantine → encode → lineage →
//!   normalize → validate → append
//! - Batch runner: rayon across files, fail-fast on configuration errors,
//!   per-file failure isolation otherwise
//! - TOML run configuration and run reports

pub mod batch;
pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod report;

pub use batch::{run_batch, IngestProgress, SilentProgress, StdoutProgress};
pub use config::{IngestConfig, QuarantinePolicy};
pub use error::IngestError;
pub use manifest::{
    Decision, JsonlManifest, ManifestEntry, ManifestKey, ManifestRepository, Outcome, RetryPolicy,
    Status,
};
pub use pipeline::IngestPipeline;
pub use report::{FileOutcome, FileReport, RunReport};
