//! Argent Core — domain types and the building blocks of Bronze→Silver ingestion.
//!
//! This crate contains everything below the orchestration layer:
//! - Domain types (raw records, canonical events, surrogate ids)
//! - SCD2 symbol dimension with point-in-time (as-of) resolution
//! - Fixed-point price/quantity codec
//! - Vendor plugin trait, registry, and bundled vendors
//! - Bronze file model and partition discovery
//! - Silver parquet store with atomic per-file appends

pub mod bronze;
pub mod codec;
pub mod dimension;
pub mod domain;
pub mod silver;
pub mod validate;
pub mod vendor;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types crossing the worker-thread boundary are Send + Sync.
    ///
    /// Batch ingestion fans files out across rayon workers, so everything the
    /// pipeline shares must satisfy these bounds. If a type regresses, the
    /// build breaks here instead of deep inside the orchestration crate.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::RawRecord>();
        require_sync::<domain::RawRecord>();
        require_send::<domain::CanonicalEvent>();
        require_sync::<domain::CanonicalEvent>();
        require_send::<domain::SymbolId>();
        require_sync::<domain::SymbolId>();
        require_send::<domain::FileId>();
        require_sync::<domain::FileId>();

        require_send::<dimension::SymbolDimension>();
        require_sync::<dimension::SymbolDimension>();
        require_send::<dimension::SymbolVersion>();
        require_sync::<dimension::SymbolVersion>();

        require_send::<bronze::BronzeFile>();
        require_sync::<bronze::BronzeFile>();
        require_send::<silver::SilverStore>();
        require_sync::<silver::SilverStore>();
        require_send::<vendor::VendorRegistry>();
        require_sync::<vendor::VendorRegistry>();
    }
}
