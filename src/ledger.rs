//! Persisted fingerprint ledger.
//!
//! The ledger maps each ingested file name to the hex SHA-256 of the bytes
//! that were ingested. It is read once at the start of an update run and
//! rewritten wholesale at the end; a run that aborts leaves the previous
//! ledger in place, so the next run simply re-processes the same files.
//!
//! On disk it is a pretty-printed JSON object with sorted keys. A missing or
//! blank file is an empty ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger {path} is not a JSON object of file hashes: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File name → content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger(BTreeMap<String, String>);

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.0.get(file_name).map(String::as_str)
    }

    pub fn insert(&mut self, file_name: impl Into<String>, hash: impl Into<String>) {
        self.0.insert(file_name.into(), hash.into());
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.0.contains_key(file_name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` onto this ledger. Entries only present here are kept.
    pub fn merge(&mut self, other: &Ledger) {
        for (name, hash) in other.iter() {
            self.insert(name, hash);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Ledger {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Read the ledger at `path`.
///
/// A missing file or one holding only whitespace yields an empty ledger.
/// Anything else that is not a JSON object of strings is an error.
pub fn read_ledger(path: &Path) -> Result<Ledger, LedgerError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::new()),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if content.trim().is_empty() {
        tracing::info!("ledger {} is empty, starting fresh", path.display());
        return Ok(Ledger::new());
    }

    serde_json::from_str(&content).map_err(|source| LedgerError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the ledger, treating any unreadable or malformed content as empty.
pub fn load_ledger(path: &Path) -> Ledger {
    match read_ledger(path) {
        Ok(ledger) => ledger,
        Err(e) => {
            tracing::warn!("{e}; treating ledger as empty");
            Ledger::new()
        }
    }
}

/// Replace the ledger file with `ledger`.
///
/// Writes a sibling temp file and renames it over the target so a crash
/// mid-write never leaves a truncated ledger behind.
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), LedgerError> {
    let write_err = |source| LedgerError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut json = serde_json::to_string_pretty(ledger)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    json.push('\n');

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}
