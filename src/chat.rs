//! Answer synthesis over retrieved chunks.

use std::sync::Arc;
use tracing::info;

use crate::chunker::approx_token_count;
use crate::completion::{CompletionModel, Message};
use crate::error::UpstreamError;
use crate::models::api::{ChatResponse, ChatSource, ChatUsage};
use crate::models::ScoredChunk;
use crate::retrieval::{RetrievalError, Retriever};

const NO_HITS_ANSWER: &str =
    "I couldn't find any relevant information in your documents to answer this question.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on \
     provided context. Answer the user's question based ONLY on the information in the \
     context. If the context doesn't contain enough information to answer the question, \
     say 'I don't have enough information to answer that question based on the provided \
     documents.'";

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("document not found")]
    NotFound,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl From<RetrievalError> for ChatError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::NotFound => ChatError::NotFound,
            RetrievalError::Upstream(e) => ChatError::Upstream(e),
            RetrievalError::Catalog(e) => ChatError::Internal(e),
        }
    }
}

/// Join chunk texts in rank order, each annotated with its source, dropping
/// whole chunks from the tail once the token budget is exceeded. The
/// top-ranked chunk is always kept. Returns the context and how many chunks
/// made it in.
pub fn build_context(chunks: &[ScoredChunk], budget_tokens: usize) -> (String, usize) {
    let mut parts: Vec<String> = Vec::new();
    let mut total_tokens = 0usize;

    for chunk in chunks {
        let part = format!(
            "[Source: {}, Chunk {}]\n{}",
            chunk.filename, chunk.chunk_index, chunk.text
        );
        let part_tokens = approx_token_count(&part);
        if !parts.is_empty() && total_tokens + part_tokens > budget_tokens {
            break;
        }
        total_tokens += part_tokens;
        parts.push(part);
    }

    let used = parts.len();
    (parts.join(CHUNK_SEPARATOR), used)
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

pub struct ChatOrchestrator {
    retriever: Arc<Retriever>,
    completion: Arc<dyn CompletionModel>,
    context_budget_tokens: usize,
    max_tokens: u32,
    temperature: f64,
    default_model: String,
}

impl ChatOrchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        completion: Arc<dyn CompletionModel>,
        context_budget_tokens: usize,
        max_tokens: u32,
        temperature: f64,
        default_model: String,
    ) -> Self {
        Self {
            retriever,
            completion,
            context_budget_tokens,
            max_tokens,
            temperature,
            default_model,
        }
    }

    /// The full question-answering pipeline: retrieve, compose context,
    /// synthesize, cite.
    pub async fn ask(
        &self,
        user_id: i64,
        question: &str,
        document_id: Option<i64>,
        top_k: usize,
        model: Option<&str>,
    ) -> Result<ChatResponse, ChatError> {
        let chunks = self
            .retriever
            .search(user_id, question, top_k, document_id)
            .await?;

        if chunks.is_empty() {
            info!("No chunks retrieved for user {user_id}; returning canned answer");
            return Ok(ChatResponse {
                answer: NO_HITS_ANSWER.to_string(),
                sources: vec![],
                chunks_found: 0,
                model: model.unwrap_or(&self.default_model).to_string(),
                usage: None,
            });
        }

        let (context, used) = build_context(&chunks, self.context_budget_tokens);
        if used < chunks.len() {
            info!(
                "Context budget trimmed {} of {} chunks",
                chunks.len() - used,
                chunks.len()
            );
        }

        let user_prompt = format!(
            "Context from documents:\n\n{context}\n\n---\n\nQuestion: {question}\n\n\
             Please provide a clear and concise answer based on the context above."
        );

        let result = self
            .completion
            .complete(
                &[Message::system(SYSTEM_PROMPT), Message::user(user_prompt)],
                model,
                Some(self.max_tokens),
                Some(self.temperature),
            )
            .await?;

        let sources: Vec<ChatSource> = chunks
            .iter()
            .map(|c| ChatSource {
                document_id: c.document_id,
                filename: c.filename.clone(),
                chunk_index: c.chunk_index,
                similarity: c.similarity,
                preview: preview(&c.text),
            })
            .collect();

        Ok(ChatResponse {
            answer: result.content,
            chunks_found: sources.len(),
            sources,
            model: result.model,
            usage: result.usage.map(|u| ChatUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i32, text: &str, similarity: f64) -> ScoredChunk {
        ScoredChunk {
            chunk_id: index as i64 + 1,
            document_id: 1,
            chunk_index: index,
            text: text.to_string(),
            filename: "report.pdf".to_string(),
            similarity,
        }
    }

    #[test]
    fn test_context_annotates_sources_in_rank_order() {
        let chunks = vec![
            chunk(2, "Second most relevant.", 0.8),
            chunk(0, "Most relevant.", 0.9),
        ];
        let (context, used) = build_context(&chunks, 10_000);
        assert_eq!(used, 2);
        assert!(context.starts_with("[Source: report.pdf, Chunk 2]"));
        let second_pos = context.find("[Source: report.pdf, Chunk 0]").unwrap();
        assert!(second_pos > 0);
        assert!(context.contains(CHUNK_SEPARATOR));
    }

    #[test]
    fn test_context_truncates_from_tail() {
        let long_text = "word ".repeat(300); // ~400 tokens each
        let chunks: Vec<ScoredChunk> = (0..10)
            .map(|i| chunk(i, &long_text, 0.9 - i as f64 * 0.01))
            .collect();
        let (context, used) = build_context(&chunks, 1000);
        assert!(used < 10);
        assert!(used >= 1);
        // Kept chunks are intact, never truncated individually.
        assert!(context.contains("[Source: report.pdf, Chunk 0]"));
        assert!(!context.contains(&format!("Chunk {}]", 9)));
    }

    #[test]
    fn test_context_keeps_top_chunk_even_over_budget() {
        let huge = "word ".repeat(5000);
        let chunks = vec![chunk(0, &huge, 0.95)];
        let (context, used) = build_context(&chunks, 100);
        assert_eq!(used, 1);
        assert!(context.contains("[Source: report.pdf, Chunk 0]"));
    }

    #[test]
    fn test_empty_chunks_empty_context() {
        let (context, used) = build_context(&[], 1000);
        assert_eq!(used, 0);
        assert!(context.is_empty());
    }

    #[test]
    fn test_preview_truncates_at_200_chars() {
        let text = "x".repeat(500);
        let p = preview(&text);
        assert_eq!(p.chars().count(), 203); // 200 + "..."
        assert!(p.ends_with("..."));

        let short = "short text";
        assert_eq!(preview(short), short);
    }
}
