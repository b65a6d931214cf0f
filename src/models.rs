//! Core data models used throughout the ingestion and answer pipelines.
//!
//! Document units and chunks are transient: only a chunk's embedded form
//! survives, as an [`IndexEntry`] in the vector index.

/// A unit of text produced by the document loader.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUnit {
    /// Originating file name inside the data directory.
    pub source: String,
    /// Position inside the source, e.g. `page 3` or `sheet 2`.
    pub locator: Option<String>,
    pub text: String,
}

/// A bounded segment of a [`DocumentUnit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Content-addressed id: SHA-256 over source, locator, index and text.
    pub id: String,
    pub source: String,
    pub locator: Option<String>,
    pub chunk_index: i64,
    pub text: String,
}

/// A chunk together with its embedding, as persisted in the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model: String,
}

/// A nearest-neighbour candidate returned by the vector index.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Cosine similarity to the query vector.
    pub similarity: f64,
}
