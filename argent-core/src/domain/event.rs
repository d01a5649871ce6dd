//! Raw and canonical event rows.
//!
//! `RawRecord` is what a vendor parser produces: canonical column names but
//! no resolved identity and no fixed-point encoding. It lives for one
//! ingestion invocation. `CanonicalEvent` is the final Silver row; once
//! appended it is immutable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::ids::{ExchangeId, FileId, SymbolId};

/// Aggressor side of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Ok(Side::Buy),
            "sell" | "s" | "ask" => Ok(Side::Sell),
            "unknown" | "" => Ok(Side::Unknown),
            other => Err(format!("unrecognized side '{other}'")),
        }
    }
}

/// Vendor-parser output row, pre-resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Local receive timestamp, microseconds since epoch.
    pub ts_local_us: i64,
    /// Exchange timestamp, if the vendor provides one.
    pub ts_exch_us: Option<i64>,
    /// Symbol exactly as the exchange names it.
    pub exchange_symbol: String,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
}

/// Final Silver row: a resolved, encoded, lineage-tagged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub ts_local_us: i64,
    pub ts_exch_us: Option<i64>,
    pub exchange_symbol: String,
    pub symbol_id: SymbolId,
    pub exchange_id: ExchangeId,
    pub date: NaiveDate,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
    /// Fixed-point price, scaled by the resolved version's `price_increment`.
    pub price_int: i64,
    /// Fixed-point quantity, scaled by the resolved version's `amount_increment`.
    pub qty_int: i64,
    pub file_id: FileId,
    /// 1-based line number within the source file, strictly increasing.
    pub file_line_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_vendor_spellings() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("B".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("ask".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!("".parse::<Side>().unwrap(), Side::Unknown);
        assert!("long".parse::<Side>().is_err());
    }

    #[test]
    fn side_display_roundtrip() {
        for side in [Side::Buy, Side::Sell, Side::Unknown] {
            assert_eq!(side.to_string().parse::<Side>().unwrap(), side);
        }
    }
}
