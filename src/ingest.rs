//! Incremental ingestion.
//!
//! One run: load ledger → detect changed files → load → chunk → embed →
//! append to the index → rewrite ledger. Only files whose content hash
//! changed since the last successful run are processed.
//!
//! A file that fails to load is logged and skipped; the rest of the batch
//! still goes through. Its hash is still recorded, so it is retried only
//! once its content changes. A file that cannot even be read is reported
//! the same way but left out of the ledger, so the next run retries it.
//! Embedding or index failures abort the run before the ledger is written,
//! so the next run repeats the work.

use anyhow::{Context, Result};

use crate::change::{detect_changes, ChangeSet};
use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{embed_texts, DisabledProvider, EmbeddingProvider};
use crate::extract::{load_file, LoadOutcome};
use crate::index::{InMemoryIndex, SqliteIndex, VectorIndex};
use crate::ledger::{load_ledger, write_ledger};
use crate::models::{Chunk, IndexEntry};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub dry_run: bool,
    /// Files currently in the data directory.
    pub scanned: usize,
    /// New or modified files.
    pub changed: Vec<String>,
    pub unsupported: Vec<String>,
    /// `(file, error)` for files that could not be read or parsed.
    pub failed: Vec<(String, String)>,
    pub units: usize,
    pub chunks: usize,
    pub entries_added: usize,
    pub entries_removed: usize,
    pub ledger_written: bool,
}

struct LoadedFile {
    name: String,
    chunks: Vec<Chunk>,
}

/// Run one ingestion pass against `index`.
///
/// With `dry_run` the files are loaded and chunked but nothing is embedded
/// and neither the index nor the ledger is touched.
pub async fn update_index(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    dry_run: bool,
) -> Result<UpdateReport> {
    let previous = load_ledger(&config.paths.ledger);
    let changes = detect_changes(&config.paths.data_dir, previous)?;

    let mut report = UpdateReport {
        dry_run,
        scanned: changes.current.len() + changes.unreadable.len(),
        changed: changes.changed.clone(),
        failed: changes.unreadable.clone(),
        ..UpdateReport::default()
    };

    if changes.is_empty() {
        tracing::info!("no new or modified files");
        return Ok(report);
    }

    let loaded = load_changed(config, &changes, &mut report);
    report.chunks = loaded.iter().map(|f| f.chunks.len()).sum();

    if dry_run {
        return Ok(report);
    }

    for file in &loaded {
        if changes.is_modified(&file.name) && config.ingest.retract_modified {
            let removed = index.remove_source(&file.name).await?;
            tracing::info!("{}: removed {} stale entries", file.name, removed);
            report.entries_removed += removed;
        }

        if file.chunks.is_empty() {
            continue;
        }
        let texts: Vec<String> = file.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_texts(embedder, &config.embedding, &texts)
            .await
            .with_context(|| format!("Embedding failed for {}", file.name))?;

        let entries: Vec<IndexEntry> = file
            .chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk,
                vector,
                model: embedder.model_name().to_string(),
            })
            .collect();
        let added = index.append(&entries).await?;
        tracing::info!("{}: {} chunks, {} new entries", file.name, entries.len(), added);
        report.entries_added += added;
    }

    write_ledger(&config.paths.ledger, &changes.merged())?;
    report.ledger_written = true;
    Ok(report)
}

fn load_changed(config: &Config, changes: &ChangeSet, report: &mut UpdateReport) -> Vec<LoadedFile> {
    let mut loaded = Vec::new();
    for name in &changes.changed {
        let path = config.paths.data_dir.join(name);
        match load_file(&path, name) {
            Ok(LoadOutcome::Loaded(units)) => {
                report.units += units.len();
                let chunks = units
                    .iter()
                    .flat_map(|unit| chunk_document(unit, &config.chunking))
                    .collect();
                loaded.push(LoadedFile {
                    name: name.clone(),
                    chunks,
                });
            }
            Ok(LoadOutcome::Unsupported) => {
                tracing::warn!("skipping unsupported file: {name}");
                report.unsupported.push(name.clone());
            }
            Err(e) => {
                tracing::warn!("failed to load {name}: {e}");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    loaded
}

/// `ragbot update`: open the index and run one pass, then print a summary.
pub async fn run_update(config: &Config, dry_run: bool) -> Result<()> {
    let report = if dry_run {
        update_index(config, &DisabledProvider, &InMemoryIndex::new(), true).await?
    } else {
        let embedder = crate::embedding::create_provider(&config.embedding)?;
        let index = SqliteIndex::open(&config.paths.index_db).await?;
        update_index(config, embedder.as_ref(), &index, false).await?
    };
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &UpdateReport) {
    if report.dry_run {
        println!("update (dry-run)");
    } else {
        println!("update");
    }
    println!("  files scanned: {}", report.scanned);
    println!("  new or modified: {}", report.changed.len());
    for name in &report.changed {
        println!("    {}", name);
    }
    for (name, err) in &report.failed {
        println!("  failed: {} ({})", name, err);
    }
    if report.changed.is_empty() {
        println!("No new or modified files. Vector store is up to date.");
        return;
    }
    if !report.unsupported.is_empty() {
        println!("  unsupported: {}", report.unsupported.join(", "));
    }
    println!("  document units: {}", report.units);
    println!("  chunks: {}", report.chunks);
    if !report.dry_run {
        println!("  index entries added: {}", report.entries_added);
        if report.entries_removed > 0 {
            println!("  index entries removed: {}", report.entries_removed);
        }
        println!("ok");
    }
}
