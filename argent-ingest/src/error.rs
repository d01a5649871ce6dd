//! Error taxonomy of the ingestion engine.
//!
//! Only `Configuration` aborts a run: without a registered parser the run
//! cannot make forward progress for any file of that type. Everything else
//! is file-scoped; the batch continues.

use thiserror::Error;

use argent_core::bronze::BronzeError;
use argent_core::codec::CodecError;
use argent_core::silver::SilverError;
use argent_core::validate::ValidationError;
use argent_core::vendor::{DataType, ParseError, PrehookError};

use crate::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Fatal: no parser registered for a requested (vendor, data type).
    #[error("no parser registered for vendor '{vendor}' data type '{data_type}'")]
    Configuration { vendor: String, data_type: DataType },

    /// Fatal: a vendor named in the run is not in the registry.
    #[error("unknown vendor '{0}'")]
    UnknownVendor(String),

    /// Fatal: unreadable or invalid run configuration.
    #[error("{0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("storage error: {0}")]
    Storage(#[from] SilverError),

    #[error("bronze error: {0}")]
    Bronze(#[from] BronzeError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("prehook error: {0}")]
    Prehook(#[from] PrehookError),
}

impl IngestError {
    /// Fatal errors abort the whole run; everything else is file-scoped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Configuration { .. }
                | IngestError::UnknownVendor(_)
                | IngestError::Config(_)
        )
    }
}
