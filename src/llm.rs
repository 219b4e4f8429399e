//! Chat-model seam and the prompts the pipeline builds for it.
//!
//! Two model roles flow through this trait: a rephraser that turns a
//! follow-up question into a standalone one, and a generator that streams the
//! final answer. Both are injected as `Arc<dyn ChatModel>`, so a deployment
//! can point them at the same backend or at different ones.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use miette::Diagnostic;
use thiserror::Error;

use crate::index::RetrievedChunk;
use crate::message::Message;

/// Errors from a chat-model backend.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    /// The model could not be reached or the request failed in transit.
    #[error("chat model request failed: {0}")]
    #[diagnostic(
        code(ragline::llm::request),
        help("Check that the model backend is running and the URL is correct.")
    )]
    Request(String),

    /// The model responded but the payload was unusable.
    #[error("chat model response malformed: {0}")]
    #[diagnostic(code(ragline::llm::malformed))]
    Malformed(String),
}

/// Stream of answer fragments in generation order.
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// A text-in, text-out completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a prompt to completion and return the whole response.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Run a prompt and stream the response fragment by fragment.
    async fn stream_complete(&self, prompt: &str) -> Result<TokenStream, LlmError>;
}

/// Instruction for turning a follow-up question into a standalone one.
pub const REPHRASE_INSTRUCTION: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can \
be understood without the chat history. Do NOT answer the question, just reformulate it if \
needed and otherwise return it as is.";

/// Instruction for answering from retrieved context.
pub const ANSWER_INSTRUCTION: &str = "You are a helpful customer support assistant. Use the \
following pieces of retrieved context to answer the question. If you don't know the answer, \
say that you don't know. Keep the answer concise and professional.";

/// Build the rephrase prompt from a history window and the latest question.
#[must_use]
pub fn rephrase_prompt(history: &[Message], question: &str) -> String {
    let mut prompt = String::from(REPHRASE_INSTRUCTION);
    prompt.push_str("\n\nChat history:\n");
    for message in history {
        prompt.push_str(&message.role);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("\nLatest question: ");
    prompt.push_str(question);
    prompt
}

/// Build the answer prompt from a formatted context block and the standalone
/// question.
#[must_use]
pub fn answer_prompt(context: &str, question: &str) -> String {
    format!("{ANSWER_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
}

/// Render retrieved chunks into the context block of the answer prompt,
/// capped at `max_chars` (cut at a char boundary, never mid-codepoint).
#[must_use]
pub fn format_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    let mut block = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            block.push_str("\n\n---\n\n");
        }
        block.push_str(&chunk.content);
        if !chunk.metadata.is_null()
            && chunk.metadata != serde_json::Value::Object(Default::default())
        {
            block.push_str("\n[source: ");
            block.push_str(&chunk.metadata.to_string());
            block.push(']');
        }
    }
    if block.len() > max_chars {
        let mut end = max_chars;
        while !block.is_char_boundary(end) {
            end -= 1;
        }
        block.truncate(end);
    }
    block
}

/// Canned chat model for tests and demos.
///
/// `complete` returns the configured reply verbatim; `stream_complete` yields
/// it word by word (whitespace kept attached to the preceding word) so token
/// ordering is observable.
#[derive(Clone, Debug)]
pub struct StaticChatModel {
    reply: String,
}

impl StaticChatModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ChatModel for StaticChatModel {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }

    async fn stream_complete(&self, _prompt: &str) -> Result<TokenStream, LlmError> {
        let fragments: Vec<Result<String, LlmError>> = split_keeping_whitespace(&self.reply)
            .into_iter()
            .map(Ok)
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

fn split_keeping_whitespace(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c.is_whitespace() {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    fn chunk(content: &str, metadata: serde_json::Value) -> RetrievedChunk {
        RetrievedChunk {
            content: content.to_string(),
            metadata,
            score: 0.9,
        }
    }

    #[test]
    fn rephrase_prompt_includes_history_and_question() {
        let history = vec![
            Message::user("Do you ship to Canada?"),
            Message::assistant("Yes, we ship to Canada."),
        ];
        let prompt = rephrase_prompt(&history, "How long does it take?");
        assert!(prompt.starts_with(REPHRASE_INSTRUCTION));
        assert!(prompt.contains("user: Do you ship to Canada?"));
        assert!(prompt.contains("assistant: Yes, we ship to Canada."));
        assert!(prompt.ends_with("Latest question: How long does it take?"));
    }

    #[test]
    fn format_context_joins_and_annotates_sources() {
        let block = format_context(
            &[
                chunk("Refunds take 5 days.", json!({"file": "faq.pdf"})),
                chunk("Returns accepted for 30 days.", json!({})),
            ],
            10_000,
        );
        assert!(block.contains("Refunds take 5 days."));
        assert!(block.contains("[source: {\"file\":\"faq.pdf\"}]"));
        assert!(block.contains("\n\n---\n\n"));
        // empty metadata object gets no source annotation
        assert!(!block.contains("Returns accepted for 30 days.\n[source"));
    }

    #[test]
    fn format_context_respects_char_cap() {
        let block = format_context(&[chunk(&"é".repeat(100), json!({}))], 51);
        assert!(block.len() <= 51);
        assert!(block.chars().all(|c| c == 'é'));
    }

    #[test]
    fn format_context_of_nothing_is_empty() {
        assert_eq!(format_context(&[], 100), "");
    }

    #[tokio::test]
    async fn static_model_streams_its_reply_in_order() {
        let model = StaticChatModel::new("Refunds take five business days.");
        let mut stream = model.stream_complete("ignored").await.unwrap();
        let mut rebuilt = String::new();
        let mut fragments = 0;
        while let Some(fragment) = stream.next().await {
            rebuilt.push_str(&fragment.unwrap());
            fragments += 1;
        }
        assert_eq!(rebuilt, "Refunds take five business days.");
        assert!(fragments > 1);
    }
}
