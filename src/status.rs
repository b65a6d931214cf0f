//! `ragbot status`: what the ledger and the index currently hold.
//!
//! Read-only. The index database is not created if it is missing.

use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Result;

use crate::change::detect_changes;
use crate::config::Config;
use crate::index::{SqliteIndex, VectorIndex};
use crate::ledger::load_ledger;

pub async fn run_status(config: &Config) -> Result<()> {
    let ledger = load_ledger(&config.paths.ledger);

    println!("ragbot status");
    println!("=============");
    println!();
    println!("  Data dir:    {}", config.paths.data_dir.display());
    println!("  Ledger:      {}", config.paths.ledger.display());
    println!(
        "  Recorded:    {} files (updated {})",
        ledger.len(),
        modified_display(&config.paths.ledger)
    );

    if config.paths.data_dir.is_dir() {
        let changes = detect_changes(&config.paths.data_dir, ledger.clone())?;
        println!("  Pending:     {} new or modified", changes.changed.len());
    } else {
        println!("  Pending:     data dir not found");
    }

    println!();
    println!("  Index:       {}", config.paths.index_db.display());
    if !config.paths.index_db.exists() {
        println!("  (not created yet; run `ragbot init` or `ragbot update`)");
        println!();
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.paths.index_db)
        .map(|m| m.len())
        .unwrap_or(0);
    let index = SqliteIndex::open(&config.paths.index_db).await?;
    let total = index.count().await?;
    let by_source = index.count_by_source().await?;

    println!("  Size:        {}", format_bytes(db_size));
    println!("  Entries:     {}", total);

    if !by_source.is_empty() {
        println!();
        println!("  {:<32} {:>8}   {}", "SOURCE", "ENTRIES", "LEDGER");
        println!("  {}", "-".repeat(56));
        for (source, count) in &by_source {
            let recorded = match ledger.get(source) {
                Some(hash) => hash.chars().take(12).collect(),
                None => "-".to_string(),
            };
            println!("  {:<32} {:>8}   {}", source, count, recorded);
        }
    }
    println!();
    Ok(())
}

fn modified_display(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format_ts_relative(d.as_secs() as i64))
        .unwrap_or_else(|| "never".to_string())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
