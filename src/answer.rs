//! Grounded answering: retrieve context, then one completion call.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::Chunk;
use crate::retrieve::retrieve;

/// Reply the model is told to give when the context lacks the answer.
pub const NO_INFORMATION: &str = "My database does not contain this information.";

const SYSTEM_PROMPT: &str = "You must answer strictly using the provided context below. \
If the answer is clearly stated in the context, quote it directly. \
If it's not present, clearly say: 'My database does not contain this information.' \
Do NOT suggest websites or general contacts unless the context is empty. \
Important: Do not include any metadata about the source of the information.";

/// Numbered passages separated by blank lines, without source metadata.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("Document {}:\n{}", i + 1, chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(question: &str, chunks: &[Chunk]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion:\n{}",
            format_context(chunks),
            question
        )),
    ]
}

pub struct AnswerPipeline {
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub model: Arc<dyn ChatModel>,
}

impl AnswerPipeline {
    /// Answer an English question from the indexed documents.
    pub async fn answer(&self, question: &str) -> Result<String> {
        let chunks = retrieve(
            self.index.as_ref(),
            self.embedder.as_ref(),
            &self.embedding,
            &self.retrieval,
            question,
        )
        .await
        .context("Retrieval failed")?;

        if chunks.is_empty() {
            tracing::warn!("no indexed context for question; has `ragbot update` been run?");
        }

        let messages = build_messages(question, &chunks);
        let answer = self
            .model
            .complete(&messages)
            .await
            .context("Answer model call failed")?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use crate::llm::{LlmError, Role};
    use crate::models::IndexEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// One dimension per keyword.
    struct KeywordEmbedder;

    const KEYWORDS: [&str; 3] = ["refund", "hostel", "library"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            KEYWORDS.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    KEYWORDS
                        .iter()
                        .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }
    }

    struct RecordingModel {
        reply: Result<String, ()>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map_err(|_| LlmError::EmptyResponse)
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            source: "policy.txt".to_string(),
            locator: None,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    async fn pipeline(model: Arc<RecordingModel>) -> AnswerPipeline {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = Arc::new(KeywordEmbedder);
        let texts = [
            ("1", "Refunds are issued within ten days."),
            ("2", "The hostel closes at 10 pm."),
        ];
        let vectors = embedder
            .embed(&texts.iter().map(|(_, t)| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let entries: Vec<IndexEntry> = texts
            .iter()
            .zip(vectors)
            .map(|((id, text), vector)| IndexEntry {
                chunk: chunk(id, text),
                vector,
                model: "keywords".to_string(),
            })
            .collect();
        index.append(&entries).await.unwrap();

        AnswerPipeline {
            index,
            embedder,
            embedding: EmbeddingConfig {
                dims: KEYWORDS.len(),
                ..EmbeddingConfig::default()
            },
            retrieval: RetrievalConfig {
                k: 1,
                fetch_k: 2,
                lambda_mult: 0.5,
            },
            model,
        }
    }

    #[test]
    fn prompt_layout() {
        let messages = build_messages(
            "When?",
            &[chunk("a", "first passage"), chunk("b", "second passage")],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains(NO_INFORMATION));
        assert_eq!(
            messages[1].content,
            "Context:\nDocument 1:\nfirst passage\n\nDocument 2:\nsecond passage\n\nQuestion:\nWhen?"
        );
        assert!(!messages[1].content.contains("policy.txt"));
    }

    #[tokio::test]
    async fn answers_from_most_relevant_chunk() {
        let model = Arc::new(RecordingModel {
            reply: Ok("  Refunds are issued within ten days.\n".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(model.clone()).await;

        let answer = pipeline.answer("How long does a refund take?").await.unwrap();
        assert_eq!(answer, "Refunds are issued within ten days.");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let user = &seen[0][1].content;
        assert!(user.contains("Refunds are issued"));
        assert!(!user.contains("hostel"));
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let model = Arc::new(RecordingModel {
            reply: Err(()),
            seen: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(model.clone()).await;
        assert!(pipeline.answer("refund?").await.is_err());
        assert_eq!(model.seen.lock().unwrap().len(), 1);
    }
}
