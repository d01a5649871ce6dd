//! Domain types shared across the ingestion engine.

pub mod event;
pub mod ids;

pub use event::{CanonicalEvent, RawRecord, Side};
pub use ids::{DatasetHash, ExchangeId, FileId, SymbolId};
