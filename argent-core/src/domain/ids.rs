use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate id of one symbol dimension version.
///
/// Each SCD2 version row gets a fresh id, so two versions of the same
/// natural key are distinguishable downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u64);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate id of one ingested Bronze file, stable once assigned by the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric exchange id, assigned by the symbol dimension on first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(pub u16);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic content hash of an encoded output batch (blake3 hex).
///
/// Two runs over the same file with the same dimension snapshot must
/// produce the same hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_hash_deterministic() {
        let a = DatasetHash::from_bytes(b"rows");
        let b = DatasetHash::from_bytes(b"rows");
        assert_eq!(a, b);
    }

    #[test]
    fn dataset_hash_differs_for_different_content() {
        assert_ne!(
            DatasetHash::from_bytes(b"rows"),
            DatasetHash::from_bytes(b"other rows")
        );
    }
}
