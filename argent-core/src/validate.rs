//! Batch validation of encoded canonical events, run just before append.
//!
//! Domain checks only — schema shape is enforced by construction. A failed
//! check fails the whole file with a short diagnostic sample of offending
//! rows; validation never drops rows silently.

use chrono::{DateTime, NaiveDate};
use thiserror::Error;

use crate::domain::{CanonicalEvent, Side};
use crate::vendor::DataType;

/// How many offending rows to quote back in the error.
const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Error)]
#[error("validation failed ({violation_count} rows): {}", sample.join("; "))]
pub struct ValidationError {
    pub violation_count: usize,
    /// Up to [`SAMPLE_LIMIT`] human-readable descriptions of offending rows.
    pub sample: Vec<String>,
}

struct Violations {
    count: usize,
    sample: Vec<String>,
}

impl Violations {
    fn new() -> Self {
        Self { count: 0, sample: Vec::new() }
    }

    fn record(&mut self, line: u32, message: String) {
        self.count += 1;
        if self.sample.len() < SAMPLE_LIMIT {
            self.sample.push(format!("line {line}: {message}"));
        }
    }

    fn into_result(self) -> Result<(), ValidationError> {
        if self.count == 0 {
            Ok(())
        } else {
            Err(ValidationError {
                violation_count: self.count,
                sample: self.sample,
            })
        }
    }
}

/// Validate one file's encoded batch.
///
/// Checks: timestamps non-decreasing and line numbers strictly increasing in
/// file order, finite non-negative quantities, finite prices, event dates
/// agreeing with the file's date partition, and for quotes the bid of a pair
/// not exceeding its ask.
pub fn validate_batch(
    events: &[CanonicalEvent],
    file_date: NaiveDate,
    data_type: DataType,
) -> Result<(), ValidationError> {
    let mut violations = Violations::new();

    let mut prev_ts: Option<i64> = None;
    let mut prev_line: Option<u32> = None;
    for e in events {
        if let Some(prev) = prev_ts {
            if e.ts_local_us < prev {
                violations.record(
                    e.file_line_number,
                    format!("timestamp {} regresses below {}", e.ts_local_us, prev),
                );
            }
        }
        prev_ts = Some(e.ts_local_us);

        if let Some(prev) = prev_line {
            if e.file_line_number <= prev {
                violations.record(
                    e.file_line_number,
                    format!("line number not increasing (previous {prev})"),
                );
            }
        }
        prev_line = Some(e.file_line_number);

        if !e.price.is_finite() {
            violations.record(e.file_line_number, format!("non-finite price {}", e.price));
        }
        if !e.qty.is_finite() || e.qty < 0.0 {
            violations.record(e.file_line_number, format!("negative or non-finite qty {}", e.qty));
        }
        if e.qty_int < 0 {
            violations.record(e.file_line_number, format!("negative qty_int {}", e.qty_int));
        }

        let event_date = DateTime::from_timestamp_micros(e.ts_local_us).map(|dt| dt.date_naive());
        if event_date != Some(file_date) {
            violations.record(
                e.file_line_number,
                format!(
                    "event date {} disagrees with partition date {file_date}",
                    event_date.map(|d| d.to_string()).unwrap_or_else(|| "?".into())
                ),
            );
        }
    }

    // Book-side ordering: a quote pair is an adjacent bid/ask sharing a
    // timestamp; the bid must not cross the ask. Pairing by adjacency (not
    // fixed offsets) keeps the check intact when a row was dropped upstream.
    if data_type == DataType::Quotes {
        for pair in events.windows(2) {
            let (bid, ask) = (&pair[0], &pair[1]);
            if bid.side == Side::Buy
                && ask.side == Side::Sell
                && bid.ts_local_us == ask.ts_local_us
                && bid.price_int > ask.price_int
            {
                violations.record(
                    bid.file_line_number,
                    format!("crossed quote: bid {} > ask {}", bid.price, ask.price),
                );
            }
        }
    }

    violations.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExchangeId, FileId, SymbolId};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn ts_on_date(offset_us: i64) -> i64 {
        date().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_micros() + offset_us
    }

    fn event(ts: i64, line: u32) -> CanonicalEvent {
        CanonicalEvent {
            ts_local_us: ts,
            ts_exch_us: None,
            exchange_symbol: "BTCUSDT".into(),
            symbol_id: SymbolId(1),
            exchange_id: ExchangeId(0),
            date: date(),
            price: 100.0,
            qty: 1.0,
            side: Side::Buy,
            price_int: 10_000,
            qty_int: 1_000,
            file_id: FileId(1),
            file_line_number: line,
        }
    }

    #[test]
    fn accepts_clean_batch() {
        let events = vec![event(ts_on_date(0), 1), event(ts_on_date(10), 2)];
        validate_batch(&events, date(), DataType::Trades).unwrap();
    }

    #[test]
    fn rejects_timestamp_regression() {
        let events = vec![event(ts_on_date(10), 1), event(ts_on_date(0), 2)];
        let err = validate_batch(&events, date(), DataType::Trades).unwrap_err();
        assert_eq!(err.violation_count, 1);
        assert!(err.sample[0].contains("regresses"));
    }

    #[test]
    fn rejects_negative_qty() {
        let mut bad = event(ts_on_date(0), 1);
        bad.qty = -0.5;
        bad.qty_int = -500;
        let err = validate_batch(&[bad], date(), DataType::Trades).unwrap_err();
        assert_eq!(err.violation_count, 2);
    }

    #[test]
    fn rejects_date_partition_mismatch() {
        // Timestamp on the day after the partition date.
        let events = vec![event(ts_on_date(86_400_000_000), 1)];
        let err = validate_batch(&events, date(), DataType::Trades).unwrap_err();
        assert!(err.sample[0].contains("disagrees"));
    }

    #[test]
    fn rejects_crossed_quotes() {
        let ts = ts_on_date(0);
        let mut bid = event(ts, 1);
        bid.price_int = 10_001;
        bid.price = 100.01;
        let mut ask = event(ts, 2);
        ask.side = Side::Sell;
        ask.price_int = 10_000;
        let err = validate_batch(&[bid, ask], date(), DataType::Quotes).unwrap_err();
        assert!(err.sample[0].contains("crossed"));
    }

    #[test]
    fn detects_crossed_pair_after_a_dropped_row() {
        // The bid of the first pair was dropped upstream, leaving its lone
        // ask at offset 0 and shifting the next pair to an odd offset.
        let ts1 = ts_on_date(0);
        let mut lone_ask = event(ts1, 2);
        lone_ask.side = Side::Sell;

        let ts2 = ts_on_date(10);
        let mut bid = event(ts2, 3);
        bid.price_int = 10_001;
        bid.price = 100.01;
        let mut ask = event(ts2, 4);
        ask.side = Side::Sell;
        ask.price_int = 10_000;

        let err =
            validate_batch(&[lone_ask, bid, ask], date(), DataType::Quotes).unwrap_err();
        assert_eq!(err.violation_count, 1);
        assert!(err.sample[0].contains("crossed"));
    }

    #[test]
    fn sample_is_capped() {
        let events: Vec<CanonicalEvent> = (0..20)
            .map(|i| {
                let mut e = event(ts_on_date(i), (i + 1) as u32);
                e.qty = -1.0;
                e
            })
            .collect();
        let err = validate_batch(&events, date(), DataType::Trades).unwrap_err();
        assert_eq!(err.violation_count, 20);
        assert_eq!(err.sample.len(), SAMPLE_LIMIT);
    }
}
