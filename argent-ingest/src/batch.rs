//! Batch orchestration: discover, decide, process, record — in parallel.
//!
//! Configuration problems (unknown vendor, missing parser) are detected in a
//! pre-flight pass and abort the run before any file is touched. Past that
//! point every failure is isolated to its file; the batch always runs to
//! completion and the report says what happened to each file.

use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use argent_core::bronze::{self, BronzeFile, DiscoveryFilter, Fingerprint};
use argent_core::dimension::SymbolDimension;
use argent_core::vendor::{DataType, ParserFn, VendorRegistry};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::manifest::{Decision, ManifestKey, ManifestRepository, Outcome, RetryPolicy};
use crate::pipeline::{IngestPipeline, ProcessOutput};
use crate::report::{FileOutcome, FileReport, RunReport};

/// Per-file progress callback, invoked from worker threads.
pub trait IngestProgress: Send + Sync {
    fn on_file(&self, report: &FileReport);
}

/// Prints one line per file.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_file(&self, report: &FileReport) {
        match &report.error_message {
            Some(msg) => println!("{:<28} {} ({msg})", report.outcome.to_string(), report.key),
            None => println!("{:<28} {}", report.outcome.to_string(), report.key),
        }
    }
}

/// No-op progress sink.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn on_file(&self, _report: &FileReport) {}
}

fn manifest_key(file: &BronzeFile) -> ManifestKey {
    ManifestKey {
        vendor: file.vendor.clone(),
        data_type: file.data_type,
        exchange: file.exchange.clone(),
        date: file.date,
        bronze_file_name: file.file_name().to_string(),
    }
}

/// Run one ingestion batch over everything the filter matches.
pub fn run_batch(
    config: &IngestConfig,
    registry: &VendorRegistry,
    manifest: &dyn ManifestRepository,
    dimension: &SymbolDimension,
    filter: &DiscoveryFilter,
    retry: &RetryPolicy,
    progress: &dyn IngestProgress,
) -> Result<RunReport, IngestError> {
    // Prehooks reorganize vendor drop zones into the partition layout, so
    // they run before discovery.
    for name in registry.vendor_names() {
        if let Some(wanted) = &filter.vendor {
            if wanted != name {
                continue;
            }
        }
        let plugin = registry
            .get(name)
            .ok_or_else(|| IngestError::UnknownVendor(name.to_string()))?;
        if plugin.capabilities().supports_prehooks {
            plugin.run_prehook(&config.bronze_root)?;
        }
    }

    let files = bronze::discover(&config.bronze_root, filter)?;
    info!(files = files.len(), root = %config.bronze_root.display(), "discovered bronze files");

    // Pre-flight: every (vendor, data type) in the batch must have a parser.
    // Failing here, before any manifest write, keeps bad runs side-effect free.
    let pairs: BTreeSet<(String, DataType)> = files
        .iter()
        .map(|f| (f.vendor.clone(), f.data_type))
        .collect();
    let mut parsers: HashMap<(String, DataType), ParserFn> = HashMap::with_capacity(pairs.len());
    for (vendor, data_type) in pairs {
        if registry.get(&vendor).is_none() {
            return Err(IngestError::UnknownVendor(vendor));
        }
        let parser = registry
            .parser(&vendor, data_type)
            .ok_or_else(|| IngestError::Configuration {
                vendor: vendor.clone(),
                data_type,
            })?;
        parsers.insert((vendor, data_type), parser);
    }

    let pipeline = IngestPipeline::new(
        argent_core::silver::SilverStore::new(&config.silver_root),
        config.quarantine,
    );

    let process_one = |file: &BronzeFile| -> Result<FileReport, IngestError> {
        let key = manifest_key(file);
        let fingerprint = if config.hash_contents {
            Fingerprint::of_path_with_sha256(&file.path)?
        } else {
            file.fingerprint.clone()
        };

        match manifest.should_process(&key, &fingerprint, retry) {
            Decision::SkipAlreadySucceeded => {
                let entry = manifest.lookup(&key);
                let report = FileReport {
                    key,
                    file_id: entry.as_ref().map(|e| e.file_id),
                    outcome: FileOutcome::SkippedAlreadySucceeded,
                    row_count: entry.map(|e| e.row_count).unwrap_or(0),
                    quarantined_rows: 0,
                    error_message: None,
                    scd2: None,
                };
                progress.on_file(&report);
                return Ok(report);
            }
            Decision::SkipQuarantined => {
                let entry = manifest.lookup(&key);
                let report = FileReport {
                    key,
                    file_id: entry.as_ref().map(|e| e.file_id),
                    outcome: FileOutcome::SkippedQuarantined,
                    row_count: 0,
                    quarantined_rows: entry.map(|e| e.quarantined_rows).unwrap_or(0),
                    error_message: None,
                    scd2: None,
                };
                progress.on_file(&report);
                return Ok(report);
            }
            Decision::Process => {}
        }

        let file_id = manifest.begin(&key, &fingerprint)?;
        let parser = parsers
            .get(&(file.vendor.clone(), file.data_type))
            .cloned()
            .ok_or_else(|| IngestError::Configuration {
                vendor: file.vendor.clone(),
                data_type: file.data_type,
            })?;
        let report = match pipeline.process_file(file, &parser, dimension, file_id) {
            Ok(ProcessOutput::Written {
                row_count,
                quarantined_rows,
                ts_local_min_us,
                ts_local_max_us,
                ..
            }) => {
                let mut outcome = Outcome::success(row_count, ts_local_min_us, ts_local_max_us);
                outcome.quarantined_rows = quarantined_rows;
                manifest.record_outcome(&key, outcome)?;
                FileReport {
                    key,
                    file_id: Some(file_id),
                    outcome: FileOutcome::Success,
                    row_count,
                    quarantined_rows,
                    error_message: None,
                    scd2: None,
                }
            }
            Ok(ProcessOutput::Quarantined {
                total_rows,
                unmapped_rows,
                sample,
            }) => {
                manifest.record_outcome(&key, Outcome::quarantined(total_rows, unmapped_rows))?;
                FileReport {
                    key,
                    file_id: Some(file_id),
                    outcome: FileOutcome::Quarantined,
                    row_count: 0,
                    quarantined_rows: unmapped_rows,
                    error_message: Some(sample.join("; ")),
                    scd2: None,
                }
            }
            Err(err) if !err.is_fatal() => {
                warn!(file = %file.file_name(), error = %err, "file failed");
                let message = err.to_string();
                manifest.record_outcome(&key, Outcome::failed(message.clone()))?;
                FileReport {
                    key,
                    file_id: Some(file_id),
                    outcome: FileOutcome::Failed,
                    row_count: 0,
                    quarantined_rows: 0,
                    error_message: Some(message),
                    scd2: None,
                }
            }
            Err(err) => {
                // Release the in-flight lock before aborting the run.
                manifest.record_outcome(&key, Outcome::failed(err.to_string()))?;
                return Err(err);
            }
        };
        progress.on_file(&report);
        Ok(report)
    };

    let run = || -> Result<Vec<FileReport>, IngestError> {
        files.par_iter().map(&process_one).collect()
    };
    let reports = if config.workers > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| IngestError::Config(format!("cannot build worker pool: {e}")))?;
        pool.install(run)?
    } else {
        run()?
    };

    let report = RunReport { files: reports };
    info!(%report, "batch complete");
    Ok(report)
}
