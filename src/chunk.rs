//! Overlapping text chunker.
//!
//! Splits a [`DocumentUnit`] into [`Chunk`]s of at most `max_chars`
//! characters. Consecutive chunks of the same unit share exactly
//! `overlap_chars` characters: each chunk after the first starts
//! `overlap_chars` before the previous one ended.
//!
//! Inside each window the split point is chosen from the most coarse
//! boundary available: paragraph break, line break, sentence end, space.
//! If none exists far enough into the window, the window is cut hard.
//!
//! Lengths are counted in Unicode scalar values, so multi-byte scripts are
//! never split mid-character.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, DocumentUnit};

/// Boundary tiers, most preferred first. A split happens right after the
/// separator.
const SEPARATOR_TIERS: &[&[&str]] = &[&["\n\n"], &["\n"], &[".", "!", "?"], &[" "]];

/// Chunk a document unit. Whitespace-only units produce no chunks.
pub fn chunk_document(unit: &DocumentUnit, config: &ChunkingConfig) -> Vec<Chunk> {
    split_text(&unit.text, config.max_chars, config.overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(unit, i as i64, text))
        .collect()
}

/// Split `text` into overlapping windows.
///
/// Callers must ensure `overlap_chars < max_chars`; the config loader
/// enforces it.
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    if text.trim().is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chars - 1);

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    loop {
        let limit = (start + max_chars).min(total);
        if limit == total {
            pieces.push(chars[start..total].iter().collect());
            break;
        }

        // A chunk must be longer than the overlap or the cursor would not move.
        let earliest = start + overlap + 1;
        let end = find_split(&chars, earliest, limit).unwrap_or(limit);
        pieces.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    pieces
}

/// Latest split position in `[lo, hi]` that directly follows a separator of
/// the best available tier.
fn find_split(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    SEPARATOR_TIERS.iter().find_map(|tier| {
        (lo..=hi)
            .rev()
            .find(|&pos| tier.iter().any(|sep| ends_with_at(chars, pos, sep)))
    })
}

fn ends_with_at(chars: &[char], pos: usize, sep: &str) -> bool {
    let len = sep.chars().count();
    pos >= len && chars[pos - len..pos].iter().copied().eq(sep.chars())
}

fn make_chunk(unit: &DocumentUnit, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(unit.source.as_bytes());
    hasher.update([0u8]);
    hasher.update(unit.locator.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());

    Chunk {
        id: hex::encode(hasher.finalize()),
        source: unit.source.clone(),
        locator: unit.locator.clone(),
        chunk_index: index,
        text,
    }
}
