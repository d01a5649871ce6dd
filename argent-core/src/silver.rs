//! Silver storage: canonical events as partitioned Parquet.
//!
//! Layout: `{root}/exchange={EXCHANGE}/date={YYYY-MM-DD}/{file_id}.parquet`
//!
//! One Bronze file appends exactly one partition file, written atomically
//! (write to .tmp, rename into place) so readers never observe a torn
//! write. Re-processing the same Bronze file overwrites the same partition
//! file — the stable `file_id` prevents duplicate appends.

use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{CanonicalEvent, DatasetHash, ExchangeId, FileId, Side, SymbolId};

#[derive(Debug, Error)]
pub enum SilverError {
    #[error("silver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("refusing to append an empty batch")]
    EmptyBatch,

    #[error("no silver partition for exchange={exchange} date={date}")]
    NoPartition { exchange: String, date: NaiveDate },
}

/// The Silver store rooted at a directory.
pub struct SilverStore {
    root: PathBuf,
}

impl SilverStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, exchange: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("exchange={exchange}"))
            .join(format!("date={date}"))
    }

    fn partition_file(&self, exchange: &str, date: NaiveDate, file_id: FileId) -> PathBuf {
        self.partition_dir(exchange, date)
            .join(format!("{file_id}.parquet"))
    }

    /// Append one file's events to its `(exchange, date)` partition.
    ///
    /// Atomic: the partition file appears fully written or not at all.
    pub fn append(
        &self,
        exchange: &str,
        date: NaiveDate,
        file_id: FileId,
        events: &[CanonicalEvent],
    ) -> Result<(), SilverError> {
        if events.is_empty() {
            return Err(SilverError::EmptyBatch);
        }
        let dir = self.partition_dir(exchange, date);
        fs::create_dir_all(&dir)?;

        let df = events_to_dataframe(events)?;
        let path = self.partition_file(exchange, date, file_id);
        let tmp = path.with_extension("parquet.tmp");

        let file = fs::File::create(&tmp)?;
        ParquetWriter::new(file)
            .finish(&mut df.clone())
            .map_err(|e| SilverError::Parquet(format!("write: {e}")))?;

        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SilverError::Io(e)
        })?;
        Ok(())
    }

    /// Load every event in a partition, sorted by `(ts_local_us, file_line_number)`.
    pub fn read_partition(
        &self,
        exchange: &str,
        date: NaiveDate,
    ) -> Result<Vec<CanonicalEvent>, SilverError> {
        let dir = self.partition_dir(exchange, date);
        if !dir.is_dir() {
            return Err(SilverError::NoPartition {
                exchange: exchange.to_string(),
                date,
            });
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("parquet"))
            .collect();
        paths.sort();

        let mut events = Vec::new();
        for path in paths {
            let file = fs::File::open(&path)?;
            let df = ParquetReader::new(file)
                .finish()
                .map_err(|e| SilverError::Parquet(format!("read {}: {e}", path.display())))?;
            events.extend(dataframe_to_events(&df)?);
        }
        events.sort_by_key(|e| (e.ts_local_us, e.file_line_number));
        Ok(events)
    }

    /// Does a partition file for this Bronze file already exist?
    pub fn has_file(&self, exchange: &str, date: NaiveDate, file_id: FileId) -> bool {
        self.partition_file(exchange, date, file_id).exists()
    }
}

/// Deterministic content hash of an encoded batch.
///
/// Hashes the canonical fixed-width encoding of every row in order, so two
/// runs over the same file with the same dimension snapshot produce the
/// same hash (the determinism property).
pub fn batch_hash(events: &[CanonicalEvent]) -> DatasetHash {
    let mut hasher = blake3::Hasher::new();
    for e in events {
        hasher.update(&e.ts_local_us.to_le_bytes());
        hasher.update(&e.ts_exch_us.unwrap_or(i64::MIN).to_le_bytes());
        hasher.update(e.exchange_symbol.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(&e.symbol_id.0.to_le_bytes());
        hasher.update(&(e.exchange_id.0 as u32).to_le_bytes());
        hasher.update(&e.price_int.to_le_bytes());
        hasher.update(&e.qty_int.to_le_bytes());
        hasher.update(e.side.as_str().as_bytes());
        hasher.update(&[0u8]);
        hasher.update(&e.file_id.0.to_le_bytes());
        hasher.update(&e.file_line_number.to_le_bytes());
    }
    DatasetHash(hasher.finalize().to_hex().to_string())
}

// ── DataFrame conversion ────────────────────────────────────────────

const EPOCH: fn() -> NaiveDate = || NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();

fn events_to_dataframe(events: &[CanonicalEvent]) -> Result<DataFrame, SilverError> {
    let ts_local: Vec<i64> = events.iter().map(|e| e.ts_local_us).collect();
    let ts_exch: Vec<Option<i64>> = events.iter().map(|e| e.ts_exch_us).collect();
    let symbols: Vec<&str> = events.iter().map(|e| e.exchange_symbol.as_str()).collect();
    let symbol_ids: Vec<u64> = events.iter().map(|e| e.symbol_id.0).collect();
    let exchange_ids: Vec<u32> = events.iter().map(|e| e.exchange_id.0 as u32).collect();
    let dates: Vec<i32> = events
        .iter()
        .map(|e| (e.date - EPOCH()).num_days() as i32)
        .collect();
    let prices: Vec<f64> = events.iter().map(|e| e.price).collect();
    let qtys: Vec<f64> = events.iter().map(|e| e.qty).collect();
    let sides: Vec<&str> = events.iter().map(|e| e.side.as_str()).collect();
    let price_ints: Vec<i64> = events.iter().map(|e| e.price_int).collect();
    let qty_ints: Vec<i64> = events.iter().map(|e| e.qty_int).collect();
    let file_ids: Vec<u64> = events.iter().map(|e| e.file_id.0).collect();
    let line_numbers: Vec<u32> = events.iter().map(|e| e.file_line_number).collect();

    DataFrame::new(vec![
        Column::new("ts_local_us".into(), ts_local),
        Column::new("ts_exch_us".into(), ts_exch),
        Column::new("exchange_symbol".into(), symbols),
        Column::new("symbol_id".into(), symbol_ids),
        Column::new("exchange_id".into(), exchange_ids),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| SilverError::Parquet(format!("date cast: {e}")))?,
        Column::new("price".into(), prices),
        Column::new("qty".into(), qtys),
        Column::new("side".into(), sides),
        Column::new("price_int".into(), price_ints),
        Column::new("qty_int".into(), qty_ints),
        Column::new("file_id".into(), file_ids),
        Column::new("file_line_number".into(), line_numbers),
    ])
    .map_err(|e| SilverError::Parquet(format!("dataframe creation: {e}")))
}

fn dataframe_to_events(df: &DataFrame) -> Result<Vec<CanonicalEvent>, SilverError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| SilverError::Parquet(format!("column '{name}': {e}")))
    };
    let typed = |name: &str, e: PolarsError| {
        SilverError::Parquet(format!("column '{name}' type: {e}"))
    };

    let ts_local = col("ts_local_us")?.i64().map_err(|e| typed("ts_local_us", e))?;
    let ts_exch = col("ts_exch_us")?.i64().map_err(|e| typed("ts_exch_us", e))?;
    let symbols = col("exchange_symbol")?
        .str()
        .map_err(|e| typed("exchange_symbol", e))?;
    let symbol_ids = col("symbol_id")?.u64().map_err(|e| typed("symbol_id", e))?;
    let exchange_ids = col("exchange_id")?.u32().map_err(|e| typed("exchange_id", e))?;
    let dates = col("date")?.date().map_err(|e| typed("date", e))?;
    let prices = col("price")?.f64().map_err(|e| typed("price", e))?;
    let qtys = col("qty")?.f64().map_err(|e| typed("qty", e))?;
    let sides = col("side")?.str().map_err(|e| typed("side", e))?;
    let price_ints = col("price_int")?.i64().map_err(|e| typed("price_int", e))?;
    let qty_ints = col("qty_int")?.i64().map_err(|e| typed("qty_int", e))?;
    let file_ids = col("file_id")?.u64().map_err(|e| typed("file_id", e))?;
    let line_numbers = col("file_line_number")?
        .u32()
        .map_err(|e| typed("file_line_number", e))?;

    let mut events = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let missing =
            |name: &str| SilverError::Parquet(format!("null '{name}' at row {i}"));
        let side = sides
            .get(i)
            .ok_or_else(|| missing("side"))?
            .parse::<Side>()
            .map_err(SilverError::Parquet)?;
        let date_days = dates.get(i).ok_or_else(|| missing("date"))?;

        events.push(CanonicalEvent {
            ts_local_us: ts_local.get(i).ok_or_else(|| missing("ts_local_us"))?,
            ts_exch_us: ts_exch.get(i),
            exchange_symbol: symbols
                .get(i)
                .ok_or_else(|| missing("exchange_symbol"))?
                .to_string(),
            symbol_id: SymbolId(symbol_ids.get(i).ok_or_else(|| missing("symbol_id"))?),
            exchange_id: ExchangeId(
                exchange_ids.get(i).ok_or_else(|| missing("exchange_id"))? as u16,
            ),
            date: EPOCH() + chrono::Duration::days(date_days as i64),
            price: prices.get(i).ok_or_else(|| missing("price"))?,
            qty: qtys.get(i).ok_or_else(|| missing("qty"))?,
            side,
            price_int: price_ints.get(i).ok_or_else(|| missing("price_int"))?,
            qty_int: qty_ints.get(i).ok_or_else(|| missing("qty_int"))?,
            file_id: FileId(file_ids.get(i).ok_or_else(|| missing("file_id"))?),
            file_line_number: line_numbers
                .get(i)
                .ok_or_else(|| missing("file_line_number"))?,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64, line: u32) -> CanonicalEvent {
        CanonicalEvent {
            ts_local_us: ts,
            ts_exch_us: Some(ts - 5),
            exchange_symbol: "BTCUSDT".into(),
            symbol_id: SymbolId(7),
            exchange_id: ExchangeId(1),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            price: 50_000.1,
            qty: 0.5,
            side: Side::Buy,
            price_int: 500_001,
            qty_int: 500,
            file_id: FileId(42),
            file_line_number: line,
        }
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SilverStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let events = vec![event(100, 1), event(200, 2)];

        store.append("spot", date, FileId(42), &events).unwrap();
        let loaded = store.read_partition("spot", date).unwrap();

        assert_eq!(loaded, events);
        assert!(store.has_file("spot", date, FileId(42)));
        assert!(!store.has_file("spot", date, FileId(43)));
    }

    #[test]
    fn reprocessing_overwrites_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let store = SilverStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        store.append("spot", date, FileId(42), &[event(100, 1)]).unwrap();
        store
            .append("spot", date, FileId(42), &[event(100, 1), event(200, 2)])
            .unwrap();

        let loaded = store.read_partition("spot", date).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn empty_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SilverStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            store.append("spot", date, FileId(1), &[]),
            Err(SilverError::EmptyBatch)
        ));
    }

    #[test]
    fn missing_partition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SilverStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            store.read_partition("spot", date),
            Err(SilverError::NoPartition { .. })
        ));
    }

    #[test]
    fn batch_hash_is_deterministic_and_content_sensitive() {
        let a = vec![event(100, 1), event(200, 2)];
        let b = vec![event(100, 1), event(200, 2)];
        assert_eq!(batch_hash(&a), batch_hash(&b));

        let mut c = b.clone();
        c[1].price_int += 1;
        assert_ne!(batch_hash(&a), batch_hash(&c));
    }
}
