//! # ragbot
//!
//! A multilingual retrieval-augmented chatbot over a folder of documents.
//!
//! Ingestion is incremental: a JSON ledger of content hashes decides which
//! files are new or modified, and only those are loaded, chunked, embedded
//! and appended to a SQLite vector index. Questions arrive from the terminal
//! or from a WhatsApp webhook, are translated to English, answered from
//! passages picked by maximal-marginal-relevance retrieval, and translated
//! back when the user wrote in an Indian language or Hinglish.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ data dir │──▶│ Load+Chunk+  │──▶│  SQLite   │
//! │ + ledger │   │    Embed     │   │  vectors  │
//! └──────────┘   └──────────────┘   └────┬─────┘
//!                                        │ MMR
//!        ┌──────────┐   ┌────────────┐   ▼
//!        │ terminal │──▶│ translate  │──▶ answer (LLM)
//!        │ WhatsApp │◀──│  in / out  │◀──┘
//!        └──────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`models`] | Core data types |
//! | [`ledger`] | File → content-hash ledger |
//! | [`change`] | Change detection against the ledger |
//! | [`extract`] | Per-format document loaders (txt, pdf, docx, xlsx, images) |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index (SQLite and in-memory) |
//! | [`ingest`] | Incremental update pipeline |
//! | [`retrieve`] | MMR retrieval |
//! | [`llm`] | OpenAI-compatible chat completion client |
//! | [`answer`] | Grounded answer generation |
//! | [`translate`] | Language detection and translation |
//! | [`app`] | Shared context and the end-to-end assistant |
//! | [`chat`] | Terminal chat loop |
//! | [`whatsapp`] | Webhook payloads and Graph API client |
//! | [`worker`] | Bounded delivery queue |
//! | [`server`] | Webhook HTTP server |
//! | [`status`] | Ledger and index overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod app;
pub mod change;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod status;
pub mod translate;
pub mod whatsapp;
pub mod worker;
