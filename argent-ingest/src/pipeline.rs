//! Per-file ingestion pipeline.
//!
//! Stage order per file: read → parse → resolve each row at its own
//! timestamp → apply the quarantine policy → fixed-point encode with the
//! resolved version's increments → tag lineage → validate → append to the
//! Silver store. A quarantine is a first-class result, not an error: the
//! file is well-formed, the dimension just cannot map (some of) it yet.

use tracing::{debug, info, warn};

use argent_core::bronze::BronzeFile;
use argent_core::codec;
use argent_core::dimension::{format_ts_us, SymbolDimension, SymbolVersion};
use argent_core::domain::{CanonicalEvent, DatasetHash, FileId, RawRecord};
use argent_core::silver::{batch_hash, SilverStore};
use argent_core::validate::validate_batch;
use argent_core::vendor::ParserFn;

use crate::config::QuarantinePolicy;
use crate::error::IngestError;

/// How many unmapped rows to describe in a quarantine sample.
const QUARANTINE_SAMPLE_LIMIT: usize = 5;

/// Result of one file making it through the pipeline without error.
#[derive(Debug, Clone)]
pub enum ProcessOutput {
    /// Events landed in the Silver store.
    Written {
        row_count: u64,
        /// Rows dropped under `Tolerate` (zero under `AllOrNothing`).
        quarantined_rows: u64,
        ts_local_min_us: i64,
        ts_local_max_us: i64,
        batch_hash: DatasetHash,
    },
    /// Nothing written; the file waits for a dimension update.
    Quarantined {
        total_rows: u64,
        unmapped_rows: u64,
        /// Up to a few human-readable descriptions of unmapped rows.
        sample: Vec<String>,
    },
}

pub struct IngestPipeline {
    silver: SilverStore,
    quarantine: QuarantinePolicy,
}

impl IngestPipeline {
    pub fn new(silver: SilverStore, quarantine: QuarantinePolicy) -> Self {
        Self { silver, quarantine }
    }

    pub fn silver(&self) -> &SilverStore {
        &self.silver
    }

    /// Run one Bronze file through every stage.
    ///
    /// `file_id` comes from the manifest's `begin` and is stable across
    /// retries of the same key, so a rerun overwrites its own partition
    /// file instead of duplicating rows.
    pub fn process_file(
        &self,
        file: &BronzeFile,
        parser: &ParserFn,
        dimension: &SymbolDimension,
        file_id: FileId,
    ) -> Result<ProcessOutput, IngestError> {
        let bytes = file.read()?;
        let records = parser(&bytes)?;
        let total_rows = records.len() as u64;
        debug!(file = %file.file_name(), rows = total_rows, "parsed bronze file");

        // Resolve every row at its own timestamp; keep the 1-based parse
        // order as the lineage line number even when rows drop out below.
        let mut mapped: Vec<(u32, RawRecord, &SymbolVersion)> =
            Vec::with_capacity(records.len());
        let mut unmapped_rows = 0u64;
        let mut sample: Vec<String> = Vec::new();
        for (i, record) in records.into_iter().enumerate() {
            let line = (i + 1) as u32;
            match dimension.resolve_named(&file.exchange, &record.exchange_symbol, record.ts_local_us)
            {
                Some(version) => mapped.push((line, record, version)),
                None => {
                    unmapped_rows += 1;
                    if sample.len() < QUARANTINE_SAMPLE_LIMIT {
                        sample.push(format!(
                            "line {line}: no version of {}/{} covers {}",
                            file.exchange,
                            record.exchange_symbol,
                            format_ts_us(record.ts_local_us)
                        ));
                    }
                }
            }
        }

        let quarantine_whole = match self.quarantine {
            QuarantinePolicy::AllOrNothing => unmapped_rows > 0,
            QuarantinePolicy::Tolerate { max_unmapped_rows } => unmapped_rows > max_unmapped_rows,
        };
        // A file with no mapped rows parks regardless of the threshold:
        // there is nothing to append, and a parked file stays eligible for
        // retry once the dimension learns its symbols.
        if quarantine_whole || mapped.is_empty() {
            warn!(
                file = %file.file_name(),
                unmapped = unmapped_rows,
                total = total_rows,
                "quarantining file"
            );
            return Ok(ProcessOutput::Quarantined {
                total_rows,
                unmapped_rows,
                sample,
            });
        }

        let mut events: Vec<CanonicalEvent> = Vec::with_capacity(mapped.len());
        for (line, record, version) in mapped {
            let price_int = codec::encode(record.price, version.attrs.price_increment)?;
            let qty_int = codec::encode(record.qty, version.attrs.amount_increment)?;
            events.push(CanonicalEvent {
                ts_local_us: record.ts_local_us,
                ts_exch_us: record.ts_exch_us,
                exchange_symbol: record.exchange_symbol,
                symbol_id: version.symbol_id,
                exchange_id: version.exchange_id,
                date: file.date,
                price: record.price,
                qty: record.qty,
                side: record.side,
                price_int,
                qty_int,
                file_id,
                file_line_number: line,
            });
        }

        validate_batch(&events, file.date, file.data_type)?;

        self.silver.append(&file.exchange, file.date, file_id, &events)?;

        let hash = batch_hash(&events);
        let ts_min = events.iter().map(|e| e.ts_local_us).min().unwrap_or(0);
        let ts_max = events.iter().map(|e| e.ts_local_us).max().unwrap_or(0);
        info!(
            file = %file.file_name(),
            rows = events.len(),
            dropped = unmapped_rows,
            hash = %hash,
            "wrote silver partition file"
        );
        Ok(ProcessOutput::Written {
            row_count: events.len() as u64,
            quarantined_rows: unmapped_rows,
            ts_local_min_us: ts_min,
            ts_local_max_us: ts_max,
            batch_hash: hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_core::bronze::Fingerprint;
    use argent_core::dimension::{AssetType, SymbolAttrs, SymbolSnapshot};
    use argent_core::vendor::{DataType, VendorRegistry};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn snapshot(symbol: &str, price_inc: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            exchange: "spot".into(),
            exchange_symbol: symbol.into(),
            attrs: SymbolAttrs {
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                asset_type: AssetType::Spot,
                tick_size: price_inc,
                lot_size: 0.001,
                price_increment: price_inc,
                amount_increment: 0.001,
                contract_size: 1.0,
            },
        }
    }

    fn bronze_file(dir: &std::path::Path, csv: &str) -> BronzeFile {
        let path = dir.join("BTCUSDT.csv");
        std::fs::write(&path, csv).unwrap();
        BronzeFile {
            path: path.clone(),
            vendor: "binance".into(),
            exchange: "spot".into(),
            data_type: DataType::Trades,
            date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            symbol: "BTCUSDT".into(),
            fingerprint: Fingerprint::of_path(&path).unwrap(),
        }
    }

    fn trades_parser() -> ParserFn {
        VendorRegistry::with_builtins()
            .parser("binance", DataType::Trades)
            .unwrap()
    }

    fn pipeline(dir: &std::path::Path, policy: QuarantinePolicy) -> IngestPipeline {
        IngestPipeline::new(SilverStore::new(PathBuf::from(dir).join("silver")), policy)
    }

    const CSV: &str = "\
symbol,ts_local_us,ts_exch_us,price,qty,side
BTCUSDT,100,90,42000.1,0.5,buy
BTCUSDT,200,,42000.2,0.25,sell
";

    #[test]
    fn mapped_file_is_written_and_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();

        let file = bronze_file(dir.path(), CSV);
        let p = pipeline(dir.path(), QuarantinePolicy::AllOrNothing);
        let out = p
            .process_file(&file, &trades_parser(), &dim, FileId(7))
            .unwrap();

        match out {
            ProcessOutput::Written { row_count, ts_local_min_us, ts_local_max_us, .. } => {
                assert_eq!(row_count, 2);
                assert_eq!(ts_local_min_us, 100);
                assert_eq!(ts_local_max_us, 200);
            }
            other => panic!("expected Written, got {other:?}"),
        }

        let events = p
            .silver()
            .read_partition("spot", file.date)
            .unwrap();
        assert_eq!(events.len(), 2);
        // price_int scaled by the 0.1 increment.
        assert_eq!(events[0].price_int, 420001);
        assert_eq!(events[0].file_id, FileId(7));
        assert_eq!(events[0].file_line_number, 1);
    }

    #[test]
    fn unmapped_symbol_quarantines_whole_file_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let dim = SymbolDimension::new();

        let file = bronze_file(dir.path(), CSV);
        let p = pipeline(dir.path(), QuarantinePolicy::AllOrNothing);
        let out = p
            .process_file(&file, &trades_parser(), &dim, FileId(1))
            .unwrap();

        match out {
            ProcessOutput::Quarantined { total_rows, unmapped_rows, sample } => {
                assert_eq!(total_rows, 2);
                assert_eq!(unmapped_rows, 2);
                assert!(sample[0].contains("BTCUSDT"));
            }
            other => panic!("expected Quarantined, got {other:?}"),
        }
        assert!(!p.silver().has_file("spot", file.date, FileId(1)));
    }

    #[test]
    fn tolerate_policy_writes_mapped_rows_and_keeps_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();

        let csv = "\
symbol,ts_local_us,ts_exch_us,price,qty,side
BTCUSDT,100,,42000.1,0.5,buy
ETHUSDT,150,,2500.0,1.0,sell
BTCUSDT,200,,42000.2,0.25,sell
";
        let file = bronze_file(dir.path(), csv);
        let p = pipeline(dir.path(), QuarantinePolicy::Tolerate { max_unmapped_rows: 1 });
        let out = p
            .process_file(&file, &trades_parser(), &dim, FileId(2))
            .unwrap();

        match out {
            ProcessOutput::Written { row_count, quarantined_rows, .. } => {
                assert_eq!(row_count, 2);
                assert_eq!(quarantined_rows, 1);
            }
            other => panic!("expected Written, got {other:?}"),
        }
        let events = p.silver().read_partition("spot", file.date).unwrap();
        // The dropped middle row leaves a gap in lineage, not a renumbering.
        assert_eq!(
            events.iter().map(|e| e.file_line_number).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn tolerate_with_no_mapped_rows_still_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let dim = SymbolDimension::new();

        // Both rows unmapped, yet within the tolerance threshold. An empty
        // append is meaningless, so the file parks for a later retry.
        let file = bronze_file(dir.path(), CSV);
        let p = pipeline(dir.path(), QuarantinePolicy::Tolerate { max_unmapped_rows: 10 });
        let out = p
            .process_file(&file, &trades_parser(), &dim, FileId(6))
            .unwrap();
        assert!(matches!(
            out,
            ProcessOutput::Quarantined { total_rows: 2, unmapped_rows: 2, .. }
        ));
        assert!(!p.silver().has_file("spot", file.date, FileId(6)));
    }

    #[test]
    fn tolerate_threshold_exceeded_quarantines_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();

        let csv = "\
symbol,ts_local_us,ts_exch_us,price,qty,side
ETHUSDT,100,,2500.0,1.0,buy
SOLUSDT,150,,150.0,2.0,sell
BTCUSDT,200,,42000.2,0.25,sell
";
        let file = bronze_file(dir.path(), csv);
        let p = pipeline(dir.path(), QuarantinePolicy::Tolerate { max_unmapped_rows: 1 });
        let out = p
            .process_file(&file, &trades_parser(), &dim, FileId(3))
            .unwrap();
        assert!(matches!(out, ProcessOutput::Quarantined { unmapped_rows: 2, .. }));
    }

    #[test]
    fn version_active_at_row_timestamp_drives_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();
        dim.upsert(&[snapshot("BTCUSDT", 0.01)], 150).unwrap();

        let file = bronze_file(dir.path(), CSV);
        let p = pipeline(dir.path(), QuarantinePolicy::AllOrNothing);
        p.process_file(&file, &trades_parser(), &dim, FileId(4))
            .unwrap();

        let events = p.silver().read_partition("spot", file.date).unwrap();
        // Row at ts=100 uses increment 0.1, row at ts=200 uses 0.01.
        assert_eq!(events[0].price_int, 420001);
        assert_eq!(events[1].price_int, 4200020);
        assert_ne!(events[0].symbol_id, events[1].symbol_id);
    }

    #[test]
    fn same_file_and_dimension_yield_the_same_batch_hash() {
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();

        let mut hashes = Vec::new();
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let file = bronze_file(dir.path(), CSV);
            let p = pipeline(dir.path(), QuarantinePolicy::AllOrNothing);
            match p.process_file(&file, &trades_parser(), &dim, FileId(9)).unwrap() {
                ProcessOutput::Written { batch_hash, .. } => hashes.push(batch_hash),
                other => panic!("expected Written, got {other:?}"),
            }
        }
        assert_eq!(hashes[0], hashes[1]);
    }

    #[test]
    fn malformed_row_is_a_failure_not_a_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let mut dim = SymbolDimension::new();
        dim.upsert(&[snapshot("BTCUSDT", 0.1)], 0).unwrap();

        let csv = "\
symbol,ts_local_us,ts_exch_us,price,qty,side
BTCUSDT,100,,not-a-price,0.5,buy
";
        let file = bronze_file(dir.path(), csv);
        let p = pipeline(dir.path(), QuarantinePolicy::AllOrNothing);
        let err = p
            .process_file(&file, &trades_parser(), &dim, FileId(5))
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert!(!err.is_fatal());
    }
}
