//! Bronze collaborator: immutable raw vendor files.
//!
//! Layout: `{root}/vendor={v}/exchange={e}/type={t}/date={YYYY-MM-DD}/{symbol}.csv`
//!
//! The core only ever reads Bronze. Discovery enumerates partition
//! directories; each file carries an identity fingerprint (size + mtime,
//! optionally a SHA-256 digest) that the manifest compares on re-runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

use crate::vendor::DataType;

#[derive(Debug, Error)]
pub enum BronzeError {
    #[error("bronze I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed partition component '{component}' under {path}")]
    MalformedPartition { path: PathBuf, component: String },
}

/// Identity fingerprint of a Bronze file.
///
/// Size + mtime is the cheap identity; the SHA-256 digest is computed on
/// demand and preferred for comparison when both sides carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub file_size_bytes: u64,
    /// Modification time, seconds since epoch.
    pub last_modified_ts: i64,
    pub sha256: Option<String>,
}

impl Fingerprint {
    /// Stat-based fingerprint (no content read).
    pub fn of_path(path: &Path) -> Result<Self, BronzeError> {
        let meta = fs::metadata(path).map_err(|source| BronzeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let last_modified_ts = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            file_size_bytes: meta.len(),
            last_modified_ts,
            sha256: None,
        })
    }

    /// Fingerprint with the content digest computed.
    pub fn of_path_with_sha256(path: &Path) -> Result<Self, BronzeError> {
        let mut fp = Self::of_path(path)?;
        let bytes = fs::read(path).map_err(|source| BronzeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        fp.sha256 = Some(format!("{:x}", Sha256::digest(&bytes)));
        Ok(fp)
    }

    /// Do two fingerprints identify the same file content?
    ///
    /// SHA-256 wins when both sides have it; otherwise size + mtime.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        match (&self.sha256, &other.sha256) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.file_size_bytes == other.file_size_bytes
                    && self.last_modified_ts == other.last_modified_ts
            }
        }
    }
}

/// One discovered Bronze file with its path components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeFile {
    pub path: PathBuf,
    pub vendor: String,
    pub exchange: String,
    pub data_type: DataType,
    pub date: NaiveDate,
    pub symbol: String,
    pub fingerprint: Fingerprint,
}

impl BronzeFile {
    /// Final path segment, used as the manifest key's file name.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<invalid>")
    }

    pub fn read(&self) -> Result<Vec<u8>, BronzeError> {
        fs::read(&self.path).map_err(|source| BronzeError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Optional narrowing of discovery.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub vendor: Option<String>,
    pub data_type: Option<DataType>,
    pub exchange: Option<String>,
}

impl DiscoveryFilter {
    fn admits(&self, vendor: &str, exchange: &str, data_type: DataType) -> bool {
        self.vendor.as_deref().map_or(true, |v| v == vendor)
            && self.exchange.as_deref().map_or(true, |e| e == exchange)
            && self.data_type.map_or(true, |t| t == data_type)
    }
}

fn partition_value<'a>(dir_name: &'a str, prefix: &str) -> Option<&'a str> {
    dir_name.strip_prefix(prefix)?.strip_prefix('=')
}

fn subdirs(path: &Path) -> Result<Vec<PathBuf>, BronzeError> {
    let mut dirs = Vec::new();
    let entries = fs::read_dir(path).map_err(|source| BronzeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| BronzeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_component<'a>(path: &'a Path, prefix: &str) -> Option<&'a str> {
    let name = path.file_name()?.to_str()?;
    partition_value(name, prefix)
}

/// Enumerate Bronze files under `root`, sorted by path for deterministic
/// batch ordering. Unrecognized directories are skipped silently; a
/// malformed date inside a recognized partition is an error.
pub fn discover(root: &Path, filter: &DiscoveryFilter) -> Result<Vec<BronzeFile>, BronzeError> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }

    for vendor_dir in subdirs(root)? {
        let Some(vendor) = dir_component(&vendor_dir, "vendor").map(str::to_string) else {
            continue;
        };
        for exchange_dir in subdirs(&vendor_dir)? {
            let Some(exchange) = dir_component(&exchange_dir, "exchange").map(str::to_string)
            else {
                continue;
            };
            for type_dir in subdirs(&exchange_dir)? {
                let Some(data_type) = dir_component(&type_dir, "type")
                    .and_then(|t| t.parse::<DataType>().ok())
                else {
                    continue;
                };
                if !filter.admits(&vendor, &exchange, data_type) {
                    continue;
                }
                for date_dir in subdirs(&type_dir)? {
                    let Some(date_raw) = dir_component(&date_dir, "date") else {
                        continue;
                    };
                    let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d").map_err(|_| {
                        BronzeError::MalformedPartition {
                            path: date_dir.clone(),
                            component: format!("date={date_raw}"),
                        }
                    })?;

                    let entries =
                        fs::read_dir(&date_dir).map_err(|source| BronzeError::Io {
                            path: date_dir.clone(),
                            source,
                        })?;
                    let mut paths: Vec<PathBuf> = Vec::new();
                    for entry in entries {
                        let entry = entry.map_err(|source| BronzeError::Io {
                            path: date_dir.clone(),
                            source,
                        })?;
                        if entry.path().is_file() {
                            paths.push(entry.path());
                        }
                    }
                    paths.sort();

                    for path in paths {
                        let symbol = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or_default()
                            .to_string();
                        let fingerprint = Fingerprint::of_path(&path)?;
                        files.push(BronzeFile {
                            path,
                            vendor: vendor.clone(),
                            exchange: exchange.clone(),
                            data_type,
                            date,
                            symbol,
                            fingerprint,
                        });
                    }
                }
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
