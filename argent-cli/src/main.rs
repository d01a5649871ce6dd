//! Argent CLI — ingestion, manifest, and dimension commands.
//!
//! Commands:
//! - `ingest` — run one Bronze→Silver batch from a TOML config
//! - `manifest status` — per-status file counts from the ledger
//! - `dimension sync` — apply one vendor metadata snapshot (SCD2 upsert)
//! - `dimension rebuild` — rebuild the dimension from a snapshot history
//! - `dimension status` — version counts and invariant audit

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use argent_core::bronze::DiscoveryFilter;
use argent_core::dimension::{SymbolDimension, SymbolSnapshot};
use argent_core::vendor::{DataType, VendorRegistry};
use argent_ingest::{run_batch, IngestConfig, JsonlManifest, RetryPolicy, StdoutProgress};

#[derive(Parser)]
#[command(name = "argent", about = "Argent — vendor market-data ingestion engine")]
struct Cli {
    /// Path to the TOML run configuration.
    #[arg(long, global = true, default_value = "argent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion batch over the Bronze landing zone.
    Ingest {
        /// Only this vendor.
        #[arg(long)]
        vendor: Option<String>,

        /// Only this exchange.
        #[arg(long)]
        exchange: Option<String>,

        /// Only this data type (trades, quotes).
        #[arg(long, value_name = "TYPE")]
        data_type: Option<DataType>,

        /// Reprocess files even when a matching success is recorded.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Retry files parked in quarantine.
        #[arg(long, default_value_t = false)]
        retry_quarantined: bool,
    },
    /// Manifest ledger commands.
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
    /// Symbol dimension commands.
    Dimension {
        #[command(subcommand)]
        action: DimensionAction,
    },
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Report per-status file counts.
    Status,
}

#[derive(Subcommand)]
enum DimensionAction {
    /// Apply one metadata snapshot: a JSON array of symbol entries.
    Sync {
        /// Snapshot file.
        snapshot: PathBuf,

        /// Effective timestamp of the snapshot, microseconds since epoch.
        #[arg(long)]
        effective_ts_us: i64,
    },
    /// Rebuild from scratch: a JSON array of [effective_ts_us, entries] pairs
    /// in ascending timestamp order.
    Rebuild {
        /// Snapshot history file.
        history: PathBuf,
    },
    /// Version counts and invariant audit.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Ingest {
            vendor,
            exchange,
            data_type,
            force,
            retry_quarantined,
        } => run_ingest(&config, vendor, exchange, data_type, force, retry_quarantined),
        Commands::Manifest { action } => match action {
            ManifestAction::Status => run_manifest_status(&config),
        },
        Commands::Dimension { action } => match action {
            DimensionAction::Sync { snapshot, effective_ts_us } => {
                run_dimension_sync(&config, &snapshot, effective_ts_us)
            }
            DimensionAction::Rebuild { history } => run_dimension_rebuild(&config, &history),
            DimensionAction::Status => run_dimension_status(&config),
        },
    }
}

fn run_ingest(
    config: &IngestConfig,
    vendor: Option<String>,
    exchange: Option<String>,
    data_type: Option<DataType>,
    force: bool,
    retry_quarantined: bool,
) -> Result<()> {
    let registry = VendorRegistry::with_builtins();
    let manifest = JsonlManifest::open(&config.manifest_path)?;
    let dimension = SymbolDimension::load(&config.dimension_path)?;
    if dimension.is_empty() {
        eprintln!(
            "warning: dimension {} is empty; every file will quarantine",
            config.dimension_path.display()
        );
    }

    let filter = DiscoveryFilter { vendor, data_type, exchange };
    let retry = RetryPolicy { force, retry_quarantined };

    let report = run_batch(
        config,
        &registry,
        &manifest,
        &dimension,
        &filter,
        &retry,
        &StdoutProgress,
    )?;
    println!("{report}");

    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_manifest_status(config: &IngestConfig) -> Result<()> {
    use argent_ingest::ManifestRepository;

    let manifest = JsonlManifest::open(&config.manifest_path)?;
    let counts = manifest.status_counts();
    if counts.is_empty() {
        println!("manifest is empty");
        return Ok(());
    }
    for (status, count) in counts {
        println!("{status:<12} {count}");
    }
    Ok(())
}

fn run_dimension_sync(
    config: &IngestConfig,
    snapshot_path: &PathBuf,
    effective_ts_us: i64,
) -> Result<()> {
    let content = std::fs::read_to_string(snapshot_path)
        .with_context(|| format!("reading snapshot {}", snapshot_path.display()))?;
    let snapshot: Vec<SymbolSnapshot> = serde_json::from_str(&content)?;
    if snapshot.is_empty() {
        bail!("snapshot {} contains no symbols", snapshot_path.display());
    }

    let mut dimension = SymbolDimension::load(&config.dimension_path)?;
    let stats = dimension.upsert(&snapshot, effective_ts_us)?;
    dimension.check_invariants()?;
    dimension.save(&config.dimension_path)?;

    println!(
        "applied snapshot: {} new, {} modified, {} delisted, {} unchanged",
        stats.new, stats.modified, stats.delisted, stats.unchanged
    );
    Ok(())
}

fn run_dimension_rebuild(config: &IngestConfig, history_path: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(history_path)
        .with_context(|| format!("reading history {}", history_path.display()))?;
    let history: Vec<(i64, Vec<SymbolSnapshot>)> = serde_json::from_str(&content)?;
    if history.is_empty() {
        bail!("history {} contains no snapshots", history_path.display());
    }

    let mut dimension = SymbolDimension::load(&config.dimension_path)?;
    let stats = dimension.rebuild(history)?;
    dimension.check_invariants()?;
    dimension.save(&config.dimension_path)?;

    println!(
        "rebuilt dimension: {} new, {} modified, {} delisted over {} versions",
        stats.new,
        stats.modified,
        stats.delisted,
        dimension.len()
    );
    Ok(())
}

fn run_dimension_status(config: &IngestConfig) -> Result<()> {
    let dimension = SymbolDimension::load(&config.dimension_path)?;
    let current = dimension.versions().iter().filter(|v| v.is_current).count();
    println!(
        "{} versions ({} current) in {}",
        dimension.len(),
        current,
        config.dimension_path.display()
    );
    match dimension.check_invariants() {
        Ok(()) => println!("invariants: ok"),
        Err(e) => {
            eprintln!("invariants: VIOLATED — {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
