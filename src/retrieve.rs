//! Diversity-aware retrieval (maximal marginal relevance).
//!
//! The index returns the `fetch_k` nearest candidates; [`mmr_select`] then
//! greedily picks `k` of them, each time taking the candidate that
//! maximises
//!
//! ```text
//! lambda * sim(query, d) - (1 - lambda) * max_{s in selected} sim(d, s)
//! ```
//!
//! so near-duplicate passages (common with overlapping chunks) do not crowd
//! out the rest of the context.

use anyhow::Result;

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::models::{Candidate, Chunk};

/// Pick up to `k` candidates by maximal marginal relevance.
///
/// `candidates` must carry their similarity to the query. Ties are broken
/// in favour of the earlier candidate.
pub fn mmr_select(candidates: Vec<Candidate>, k: usize, lambda: f64) -> Vec<Candidate> {
    let mut remaining: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut selected: Vec<Candidate> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (i, slot) in remaining.iter().enumerate() {
            let Some(candidate) = slot else { continue };
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.vector, &s.vector) as f64)
                .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
                .unwrap_or(0.0);
            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        match best.and_then(|(i, _)| remaining[i].take()) {
            Some(candidate) => selected.push(candidate),
            None => break,
        }
    }

    selected
}

/// Embed `question` and return the `k` chunks chosen by MMR.
pub async fn retrieve(
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingProvider,
    embedding: &EmbeddingConfig,
    retrieval: &RetrievalConfig,
    question: &str,
) -> Result<Vec<Chunk>> {
    let query = embed_query(embedder, embedding, question).await?;
    let candidates = index.candidates(&query, retrieval.fetch_k).await?;
    tracing::debug!(
        "retrieved {} candidates for MMR (k={}, lambda={})",
        candidates.len(),
        retrieval.k,
        retrieval.lambda_mult
    );
    Ok(mmr_select(candidates, retrieval.k, retrieval.lambda_mult)
        .into_iter()
        .map(|c| c.chunk)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, vector: Vec<f32>, query: &[f32]) -> Candidate {
        Candidate {
            similarity: cosine_similarity(query, &vector) as f64,
            chunk: Chunk {
                id: id.to_string(),
                source: "s.txt".to_string(),
                locator: None,
                chunk_index: 0,
                text: id.to_string(),
            },
            vector,
        }
    }

    fn ids(selected: &[Candidate]) -> Vec<&str> {
        selected.iter().map(|c| c.chunk.id.as_str()).collect()
    }

    fn pool() -> Vec<Candidate> {
        let q = [1.0, 0.0];
        vec![
            candidate("a", vec![0.95, 0.312], &q),
            candidate("near_dup", vec![0.94, 0.341], &q),
            candidate("diverse", vec![0.8, -0.6], &q),
        ]
    }

    #[test]
    fn lambda_one_is_pure_similarity() {
        let selected = mmr_select(pool(), 2, 1.0);
        assert_eq!(ids(&selected), vec!["a", "near_dup"]);
    }

    #[test]
    fn redundancy_penalty_prefers_diverse() {
        let selected = mmr_select(pool(), 2, 0.5);
        assert_eq!(ids(&selected), vec!["a", "diverse"]);
    }

    #[test]
    fn k_larger_than_pool_returns_all() {
        let selected = mmr_select(pool(), 10, 0.5);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn empty_pool_or_zero_k() {
        assert!(mmr_select(Vec::new(), 5, 0.5).is_empty());
        assert!(mmr_select(pool(), 0, 0.5).is_empty());
    }

    #[test]
    fn ties_pick_earlier_candidate() {
        let q = [1.0, 0.0];
        let pool = vec![
            candidate("first", vec![1.0, 0.0], &q),
            candidate("second", vec![1.0, 0.0], &q),
        ];
        let selected = mmr_select(pool, 1, 0.5);
        assert_eq!(ids(&selected), vec!["first"]);
    }
}
