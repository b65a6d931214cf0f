//! Application context and the end-to-end assistant.
//!
//! [`AppContext`] is built once at process start and shared by `Arc`: it
//! owns the configuration, the loaded embedding model and the vector index.
//! [`Assistant`] combines it with the two chat models into the
//! question → answer flow used by the terminal, `ask` and the webhook.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::answer::AnswerPipeline;
use crate::config::{Config, LlmCredentials};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::{SqliteIndex, VectorIndex};
use crate::llm::{ChatModel, OpenAiCompatibleClient};
use crate::translate::{needs_translation, Translator};

pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
}

impl AppContext {
    /// Load the embedding model and open the on-disk index.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let index = SqliteIndex::open(&config.paths.index_db).await?;
        Ok(Self {
            config,
            embedder,
            index: Arc::new(index),
        })
    }
}

/// Anything that turns a user message into a reply.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, input: &str) -> Result<String>;
}

pub struct Assistant {
    translator: Translator,
    pipeline: AnswerPipeline,
}

impl Assistant {
    pub fn new(
        ctx: &AppContext,
        answer_model: Arc<dyn ChatModel>,
        translate_model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            translator: Translator::new(translate_model),
            pipeline: AnswerPipeline {
                index: Arc::clone(&ctx.index),
                embedder: Arc::clone(&ctx.embedder),
                embedding: ctx.config.embedding.clone(),
                retrieval: ctx.config.retrieval.clone(),
                model: answer_model,
            },
        }
    }

    /// Build the assistant with hosted chat models.
    pub fn from_credentials(ctx: &AppContext, credentials: &LlmCredentials) -> Result<Self> {
        let llm = &ctx.config.llm;
        let answer = OpenAiCompatibleClient::new(
            &llm.base_url,
            &credentials.answer_api_key,
            &llm.answer_model,
            llm.temperature,
            llm.timeout_secs,
        )?;
        let translate = OpenAiCompatibleClient::new(
            &llm.base_url,
            &credentials.translate_api_key,
            &llm.translate_model,
            llm.temperature,
            llm.timeout_secs,
        )?;
        Ok(Self::new(ctx, Arc::new(answer), Arc::new(translate)))
    }

    /// Detect and translate the question, answer it in English, then
    /// translate the answer back when the language policy asks for it.
    pub async fn ask(&self, input: &str) -> Result<String> {
        let detection = self
            .translator
            .detect(input)
            .await
            .context("Language detection failed")?;

        let answer = self.pipeline.answer(&detection.translation).await?;

        if detection.is_english() || !needs_translation(&detection.language, &answer) {
            return Ok(answer);
        }

        self.translator
            .translate_out(&answer, &detection.language)
            .await
            .context("Answer translation failed")
    }
}

#[async_trait]
impl Responder for Assistant {
    async fn respond(&self, input: &str) -> Result<String> {
        self.ask(input).await
    }
}
