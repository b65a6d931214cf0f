//! Change detection over the flat data directory.
//!
//! Every regular file directly inside the directory is fingerprinted with
//! SHA-256 and compared against the previous ledger. Files that are new or
//! whose hash differs are reported as changed. Files that disappeared are
//! not reported and keep their ledger entries.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::ledger::Ledger;

/// Outcome of comparing the data directory against a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// New or modified file names, sorted.
    pub changed: Vec<String>,
    /// The ledger as it was loaded, untouched.
    pub previous: Ledger,
    /// Fresh hashes of every file currently in the directory.
    pub current: Ledger,
    /// `(file, error)` for files that could not be read. They are left out
    /// of `current` so the next run tries them again.
    pub unreadable: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Whether a changed file was already recorded, i.e. modified rather than new.
    pub fn is_modified(&self, file_name: &str) -> bool {
        self.previous.contains(file_name)
    }

    /// Ledger to persist after a successful run: previous entries overlaid
    /// with the current hashes.
    pub fn merged(&self) -> Ledger {
        let mut ledger = self.previous.clone();
        ledger.merge(&self.current);
        ledger
    }
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn hash_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

pub fn detect_changes(data_dir: &Path, previous: Ledger) -> Result<ChangeSet> {
    if !data_dir.is_dir() {
        bail!("Data directory does not exist: {}", data_dir.display());
    }

    let mut current = Ledger::new();
    let mut changed = Vec::new();
    let mut unreadable = Vec::new();

    // Symlinks are resolved so that links to files count and links to
    // directories are skipped like directories.
    let walker = WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable directory entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let hash = match hash_file(entry.path()) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!("skipping {name}: {e:#}");
                unreadable.push((name, format!("{e:#}")));
                continue;
            }
        };

        if previous.get(&name) != Some(hash.as_str()) {
            changed.push(name.clone());
        }
        current.insert(name, hash);
    }

    Ok(ChangeSet {
        changed,
        previous,
        current,
        unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn example_new_file_detected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        let h1 = hash_bytes(b"alpha");
        let h2 = hash_bytes(b"beta");

        let previous: Ledger = [("a.txt", h1.clone())].into_iter().collect();
        let changes = detect_changes(tmp.path(), previous.clone()).unwrap();

        assert_eq!(changes.changed, vec!["b.txt".to_string()]);
        assert_eq!(changes.previous, previous);
        let expected: Ledger = [("a.txt", h1), ("b.txt", h2)].into_iter().collect();
        assert_eq!(changes.merged(), expected);
        assert!(!changes.is_modified("b.txt"));
    }

    #[test]
    fn unchanged_files_excluded_on_second_run() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("b.pdf"), "beta").unwrap();

        let first = detect_changes(tmp.path(), Ledger::new()).unwrap();
        assert_eq!(first.changed.len(), 2);

        let second = detect_changes(tmp.path(), first.merged()).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn modified_file_always_included() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha v2").unwrap();
        let previous: Ledger = [("a.txt", hash_bytes(b"alpha v1"))].into_iter().collect();

        let changes = detect_changes(tmp.path(), previous).unwrap();
        assert_eq!(changes.changed, vec!["a.txt".to_string()]);
        assert!(changes.is_modified("a.txt"));
    }

    #[test]
    fn deleted_files_keep_their_entries() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        let previous: Ledger = [("a.txt", hash_bytes(b"alpha")), ("gone.txt", "H9".into())]
            .into_iter()
            .collect();

        let changes = detect_changes(tmp.path(), previous).unwrap();
        assert!(changes.is_empty());
        assert!(!changes.current.contains("gone.txt"));
        assert_eq!(changes.merged().get("gone.txt"), Some("H9"));
    }

    #[test]
    fn subdirectories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("inner.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("top.txt"), "y").unwrap();

        let changes = detect_changes(tmp.path(), Ledger::new()).unwrap();
        assert_eq!(changes.changed, vec!["top.txt".to_string()]);
        assert_eq!(changes.current.len(), 1);
    }

    #[test]
    fn changed_list_is_sorted() {
        let tmp = TempDir::new().unwrap();
        for name in ["c.txt", "a.txt", "b.txt"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }
        let changes = detect_changes(tmp.path(), Ledger::new()).unwrap();
        assert_eq!(changes.changed, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreadable_file_does_not_block_the_scan() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("good.txt"), "fine").unwrap();
        // Reading /proc/self/mem from offset 0 fails with EIO.
        std::os::unix::fs::symlink("/proc/self/mem", tmp.path().join("bad.txt")).unwrap();

        let changes = detect_changes(tmp.path(), Ledger::new()).unwrap();
        assert_eq!(changes.changed, vec!["good.txt".to_string()]);
        assert!(!changes.current.contains("bad.txt"));
        assert_eq!(changes.unreadable.len(), 1);
        assert_eq!(changes.unreadable[0].0, "bad.txt");
    }

    #[test]
    fn missing_directory_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(detect_changes(&tmp.path().join("absent"), Ledger::new()).is_err());
    }
}
