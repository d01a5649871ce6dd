//! SCD Type-2 symbol dimension with point-in-time resolution.
//!
//! Instrument metadata drifts over time (tick-size changes, relistings).
//! The dimension keeps every version as a row with a half-open validity
//! window `[valid_from_us, valid_until_us)`; resolution at a timestamp is a
//! backward interval as-of lookup against those windows, never "most recent
//! version". Rows are closed by the upsert algorithm, never edited in place
//! or deleted.
//!
//! Invariant per natural key `(exchange_id, exchange_symbol)`:
//! - windows never overlap;
//! - consecutive versions of a continuous listing are contiguous (a gap can
//!   only follow a delisting, i.e. a close without a successor);
//! - at most one version is current, and it is the open-window one.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::domain::{ExchangeId, SymbolId};

/// The "never expires" sentinel for `valid_until_us`.
///
/// Defined once; everything that needs an open window uses this constant
/// instead of repeating a magic number.
pub const MAX_TS_US: i64 = i64::MAX;

/// Instrument class of a listed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Spot,
    Perpetual,
    Future,
    Option,
}

/// Versioned attributes of a symbol. Any change here triggers a new SCD2 version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAttrs {
    pub base_asset: String,
    pub quote_asset: String,
    pub asset_type: AssetType,
    pub tick_size: f64,
    pub lot_size: f64,
    /// Increment used to fixed-point encode prices of this version.
    pub price_increment: f64,
    /// Increment used to fixed-point encode quantities of this version.
    pub amount_increment: f64,
    pub contract_size: f64,
}

/// One observed symbol in a vendor metadata snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub exchange: String,
    pub exchange_symbol: String,
    #[serde(flatten)]
    pub attrs: SymbolAttrs,
}

/// One SCD2 version row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolVersion {
    pub symbol_id: SymbolId,
    pub exchange_id: ExchangeId,
    pub exchange_symbol: String,
    pub attrs: SymbolAttrs,
    pub valid_from_us: i64,
    pub valid_until_us: i64,
    pub is_current: bool,
}

impl SymbolVersion {
    /// Does this version's window contain `ts_us`?
    pub fn covers(&self, ts_us: i64) -> bool {
        self.valid_from_us <= ts_us && ts_us < self.valid_until_us
    }
}

/// Audit counters produced by one `upsert`, recorded into the manifest when
/// a file drives dimension changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scd2Stats {
    pub new: usize,
    pub modified: usize,
    pub delisted: usize,
    pub unchanged: usize,
}

#[derive(Debug, Error)]
pub enum DimensionError {
    #[error("dimension I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dimension serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(
        "effective timestamp {effective_ts_us} is behind the latest version \
         boundary of {exchange}:{symbol} ({boundary_us})"
    )]
    NonMonotonicEffectiveTs {
        exchange: String,
        symbol: String,
        effective_ts_us: i64,
        boundary_us: i64,
    },

    #[error("overlapping validity windows for {exchange_id}:{symbol} at {ts_us}")]
    OverlappingWindows {
        exchange_id: ExchangeId,
        symbol: String,
        ts_us: i64,
    },

    #[error("multiple current versions for {exchange_id}:{symbol}")]
    MultipleCurrent {
        exchange_id: ExchangeId,
        symbol: String,
    },

    #[error("version of {exchange_id}:{symbol} marked current but its window is closed")]
    ClosedCurrent {
        exchange_id: ExchangeId,
        symbol: String,
    },

    #[error("rebuild snapshots must be in ascending effective-ts order ({prev} then {next})")]
    UnorderedSnapshots { prev: i64, next: i64 },
}

type NaturalKey = (ExchangeId, String);

/// Persisted shape of the dimension. The in-memory index is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
struct DimensionFile {
    schema_version: u32,
    next_symbol_id: u64,
    next_exchange_id: u16,
    exchange_ids: BTreeMap<String, ExchangeId>,
    versions: Vec<SymbolVersion>,
}

const DIMENSION_SCHEMA_VERSION: u32 = 1;

/// Append-only SCD2 table of symbol versions plus the exchange name→id map.
#[derive(Debug, Default)]
pub struct SymbolDimension {
    next_symbol_id: u64,
    next_exchange_id: u16,
    exchange_ids: BTreeMap<String, ExchangeId>,
    versions: Vec<SymbolVersion>,
    /// Per natural key: indices into `versions`, sorted by `valid_from_us`.
    index: HashMap<NaturalKey, Vec<usize>>,
}

impl SymbolDimension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> &[SymbolVersion] {
        &self.versions
    }

    /// Numeric id of a known exchange name.
    pub fn exchange_id(&self, exchange: &str) -> Option<ExchangeId> {
        self.exchange_ids.get(exchange).copied()
    }

    fn intern_exchange(&mut self, exchange: &str) -> ExchangeId {
        if let Some(id) = self.exchange_ids.get(exchange) {
            return *id;
        }
        let id = ExchangeId(self.next_exchange_id);
        self.next_exchange_id += 1;
        self.exchange_ids.insert(exchange.to_string(), id);
        id
    }

    fn push_version(&mut self, version: SymbolVersion) {
        let key = (version.exchange_id, version.exchange_symbol.clone());
        let idx = self.versions.len();
        self.versions.push(version);
        self.index.entry(key).or_default().push(idx);
    }

    /// The latest window edge recorded for a key: the open version's
    /// `valid_from_us`, or the final close of a fully-closed history. Inserts
    /// before this point would overlap existing windows or unsort the index.
    fn latest_boundary(&self, key: &NaturalKey) -> Option<i64> {
        let idxs = self.index.get(key)?;
        let last = &self.versions[*idxs.last()?];
        Some(if last.is_current {
            last.valid_from_us
        } else {
            last.valid_until_us
        })
    }

    fn current_idx(&self, key: &NaturalKey) -> Option<usize> {
        self.index
            .get(key)?
            .iter()
            .rev()
            .copied()
            .find(|&i| self.versions[i].is_current)
    }

    /// The currently-open version of a natural key, if any.
    pub fn current(&self, exchange_id: ExchangeId, exchange_symbol: &str) -> Option<&SymbolVersion> {
        let key = (exchange_id, exchange_symbol.to_string());
        self.current_idx(&key).map(|i| &self.versions[i])
    }

    /// Backward interval as-of resolution: the version whose window contains
    /// `ts_local_us`. By the dimension invariant at most one version matches.
    /// `None` means unresolved, which signals quarantine to the pipeline.
    pub fn resolve(
        &self,
        exchange_id: ExchangeId,
        exchange_symbol: &str,
        ts_local_us: i64,
    ) -> Option<&SymbolVersion> {
        let key = (exchange_id, exchange_symbol.to_string());
        let idxs = self.index.get(&key)?;
        // Greatest valid_from_us <= ts, then confirm the window is still open at ts.
        let pos = idxs.partition_point(|&i| self.versions[i].valid_from_us <= ts_local_us);
        if pos == 0 {
            return None;
        }
        let candidate = &self.versions[idxs[pos - 1]];
        candidate.covers(ts_local_us).then_some(candidate)
    }

    /// Resolution by exchange name, for callers holding Bronze path components.
    pub fn resolve_named(
        &self,
        exchange: &str,
        exchange_symbol: &str,
        ts_local_us: i64,
    ) -> Option<&SymbolVersion> {
        let exchange_id = self.exchange_id(exchange)?;
        self.resolve(exchange_id, exchange_symbol, ts_local_us)
    }

    /// Incremental SCD2 upsert: apply one metadata snapshot at `effective_ts_us`.
    ///
    /// - unseen natural keys insert a fresh current version;
    /// - keys whose attributes changed have their current version closed at
    ///   `effective_ts_us` and a new current version opened (fresh surrogate id);
    /// - keys with a current version but absent from the snapshot are closed
    ///   (delisted) — but only for exchanges the snapshot actually covers,
    ///   so a single-exchange snapshot cannot delist the rest of the world.
    pub fn upsert(
        &mut self,
        snapshot: &[SymbolSnapshot],
        effective_ts_us: i64,
    ) -> Result<Scd2Stats, DimensionError> {
        let mut stats = Scd2Stats::default();
        let mut seen: HashSet<NaturalKey> = HashSet::with_capacity(snapshot.len());
        let mut snapshot_exchanges: HashSet<ExchangeId> = HashSet::new();

        for snap in snapshot {
            let exchange_id = self.intern_exchange(&snap.exchange);
            snapshot_exchanges.insert(exchange_id);
            let key = (exchange_id, snap.exchange_symbol.clone());
            seen.insert(key.clone());

            match self.current_idx(&key) {
                None => {
                    // A relisting must not open a window before the key's
                    // last close; that would overlap the closed history.
                    if let Some(boundary_us) = self.latest_boundary(&key) {
                        if effective_ts_us < boundary_us {
                            return Err(DimensionError::NonMonotonicEffectiveTs {
                                exchange: snap.exchange.clone(),
                                symbol: snap.exchange_symbol.clone(),
                                effective_ts_us,
                                boundary_us,
                            });
                        }
                    }
                    stats.new += 1;
                    let symbol_id = SymbolId(self.next_symbol_id);
                    self.next_symbol_id += 1;
                    self.push_version(SymbolVersion {
                        symbol_id,
                        exchange_id,
                        exchange_symbol: snap.exchange_symbol.clone(),
                        attrs: snap.attrs.clone(),
                        valid_from_us: effective_ts_us,
                        valid_until_us: MAX_TS_US,
                        is_current: true,
                    });
                }
                Some(idx) if self.versions[idx].attrs == snap.attrs => {
                    stats.unchanged += 1;
                }
                Some(idx) => {
                    if effective_ts_us <= self.versions[idx].valid_from_us {
                        return Err(DimensionError::NonMonotonicEffectiveTs {
                            exchange: snap.exchange.clone(),
                            symbol: snap.exchange_symbol.clone(),
                            effective_ts_us,
                            boundary_us: self.versions[idx].valid_from_us,
                        });
                    }
                    stats.modified += 1;
                    self.versions[idx].valid_until_us = effective_ts_us;
                    self.versions[idx].is_current = false;
                    let symbol_id = SymbolId(self.next_symbol_id);
                    self.next_symbol_id += 1;
                    self.push_version(SymbolVersion {
                        symbol_id,
                        exchange_id,
                        exchange_symbol: snap.exchange_symbol.clone(),
                        attrs: snap.attrs.clone(),
                        valid_from_us: effective_ts_us,
                        valid_until_us: MAX_TS_US,
                        is_current: true,
                    });
                }
            }
        }

        // Delist current keys the snapshot no longer carries.
        let to_close: Vec<usize> = self
            .versions
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                v.is_current
                    && snapshot_exchanges.contains(&v.exchange_id)
                    && !seen.contains(&(v.exchange_id, v.exchange_symbol.clone()))
            })
            .map(|(i, _)| i)
            .collect();
        for idx in to_close {
            if effective_ts_us > self.versions[idx].valid_from_us {
                stats.delisted += 1;
                self.versions[idx].valid_until_us = effective_ts_us;
                self.versions[idx].is_current = false;
            }
        }

        Ok(stats)
    }

    /// Recompute the entire version history from an ordered sequence of full
    /// snapshots. Used to repair a divergent history; surrogate ids are
    /// reassigned, exchange ids are preserved.
    pub fn rebuild<I>(&mut self, snapshots: I) -> Result<Scd2Stats, DimensionError>
    where
        I: IntoIterator<Item = (i64, Vec<SymbolSnapshot>)>,
    {
        self.versions.clear();
        self.index.clear();
        self.next_symbol_id = 0;

        let mut total = Scd2Stats::default();
        let mut prev_ts: Option<i64> = None;
        for (effective_ts_us, snapshot) in snapshots {
            if let Some(prev) = prev_ts {
                if effective_ts_us <= prev {
                    return Err(DimensionError::UnorderedSnapshots {
                        prev,
                        next: effective_ts_us,
                    });
                }
            }
            prev_ts = Some(effective_ts_us);
            let stats = self.upsert(&snapshot, effective_ts_us)?;
            total.new += stats.new;
            total.modified += stats.modified;
            total.delisted += stats.delisted;
            total.unchanged += stats.unchanged;
        }
        Ok(total)
    }

    /// Audit the SCD2 invariant over the whole table.
    pub fn check_invariants(&self) -> Result<(), DimensionError> {
        for (key, idxs) in &self.index {
            let mut current_count = 0usize;
            for window in idxs.windows(2) {
                let a = &self.versions[window[0]];
                let b = &self.versions[window[1]];
                if b.valid_from_us < a.valid_until_us {
                    return Err(DimensionError::OverlappingWindows {
                        exchange_id: key.0,
                        symbol: key.1.clone(),
                        ts_us: b.valid_from_us,
                    });
                }
            }
            for &i in idxs {
                let v = &self.versions[i];
                if v.is_current {
                    current_count += 1;
                    if v.valid_until_us != MAX_TS_US {
                        return Err(DimensionError::ClosedCurrent {
                            exchange_id: key.0,
                            symbol: key.1.clone(),
                        });
                    }
                }
            }
            if current_count > 1 {
                return Err(DimensionError::MultipleCurrent {
                    exchange_id: key.0,
                    symbol: key.1.clone(),
                });
            }
        }
        Ok(())
    }

    /// Load a dimension from its JSON snapshot file. A missing file yields an
    /// empty dimension — first sync populates it.
    pub fn load(path: &Path) -> Result<Self, DimensionError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let file: DimensionFile = serde_json::from_str(&content)?;
        let mut dim = SymbolDimension {
            next_symbol_id: file.next_symbol_id,
            next_exchange_id: file.next_exchange_id,
            exchange_ids: file.exchange_ids,
            versions: Vec::with_capacity(file.versions.len()),
            index: HashMap::new(),
        };
        for version in file.versions {
            dim.push_version(version);
        }
        // Keep per-key index sorted by valid_from for binary-search resolution.
        for idxs in dim.index.values_mut() {
            idxs.sort_by_key(|&i| dim.versions[i].valid_from_us);
        }
        Ok(dim)
    }

    /// Atomically persist the dimension (write tmp, rename into place).
    pub fn save(&self, path: &Path) -> Result<(), DimensionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = DimensionFile {
            schema_version: DIMENSION_SCHEMA_VERSION,
            next_symbol_id: self.next_symbol_id,
            next_exchange_id: self.next_exchange_id,
            exchange_ids: self.exchange_ids.clone(),
            versions: self.versions.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            DimensionError::Io(e)
        })?;
        Ok(())
    }
}

/// Human-readable rendering of a microsecond timestamp, for diagnostics.
pub fn format_ts_us(ts_us: i64) -> String {
    if ts_us == MAX_TS_US {
        return "+inf".to_string();
    }
    DateTime::from_timestamp_micros(ts_us)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts_us.to_string())
}
