//! Ollama HTTP clients for chat completion and embeddings.
//!
//! Talks to a local or remote Ollama server via its JSON API. Generation uses
//! `/api/generate`; streamed responses arrive as NDJSON, one
//! `{"response": ..., "done": ...}` object per line, which the client turns
//! into a fragment stream. Embeddings use `/api/embeddings`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::embeddings::{EMBEDDING_DIM, EmbeddingError, EmbeddingProvider};
use crate::llm::{ChatModel, LlmError, TokenStream};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// Chat-model client for an Ollama server.
#[derive(Clone, Debug)]
pub struct OllamaChatModel {
    client: reqwest::Client,
    base_url: Arc<str>,
    model: Arc<str>,
    temperature: f32,
}

impl OllamaChatModel {
    /// Client for `model` served at `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_base_url(base_url.into()),
            model: Arc::from(model.into()),
            temperature: 0.2,
        }
    }

    /// Override the sampling temperature (default 0.2).
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .request(prompt, false)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(body.response)
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TokenStream, LlmError> {
        let response = self
            .request(prompt, true)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let fragments = response
            .bytes_stream()
            .map_err(|e| LlmError::Request(e.to_string()))
            .scan(String::new(), |buffer, chunk| {
                let out = match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_ndjson_lines(buffer)
                    }
                    Err(err) => vec![Err(err)],
                };
                std::future::ready(Some(out))
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(fragments)
    }
}

fn normalize_base_url(url: String) -> Arc<str> {
    Arc::from(url.trim_end_matches('/'))
}

/// Parse every complete NDJSON line in `buffer`, leaving any trailing partial
/// line in place for the next chunk.
fn drain_ndjson_lines(buffer: &mut String) -> Vec<Result<String, LlmError>> {
    let mut out = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerateResponse>(line) {
            Ok(parsed) => {
                if !parsed.response.is_empty() {
                    out.push(Ok(parsed.response));
                }
                if parsed.done {
                    break;
                }
            }
            Err(err) => out.push(Err(LlmError::Malformed(err.to_string()))),
        }
    }
    out
}

/// Embedding client for an Ollama server.
#[derive(Clone, Debug)]
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    base_url: Arc<str>,
    model: Arc<str>,
    dimensions: usize,
}

impl OllamaEmbeddings {
    /// Client for `model` served at `base_url`. The model must produce
    /// vectors of the configured dimensionality (default 384, e.g.
    /// `all-minilm`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_base_url(base_url.into()),
            model: Arc::from(model.into()),
            dimensions: EMBEDDING_DIM,
        }
    }

    /// Override the expected vector dimensionality.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingsRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;

        if body.embedding.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: body.embedding.len(),
            });
        }
        Ok(body.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_lines_and_keeps_partial_tail() {
        let mut buffer = String::from(
            "{\"response\":\"Hel\",\"done\":false}\n{\"response\":\"lo\",\"done\":false}\n{\"respon",
        );
        let fragments = drain_ndjson_lines(&mut buffer);
        let fragments: Vec<String> = fragments.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(buffer, "{\"respon");
    }

    #[test]
    fn done_line_carries_no_fragment() {
        let mut buffer = String::from("{\"response\":\"\",\"done\":true}\n");
        assert!(drain_ndjson_lines(&mut buffer).is_empty());
    }

    #[test]
    fn malformed_line_surfaces_as_error() {
        let mut buffer = String::from("not json\n");
        let fragments = drain_ndjson_lines(&mut buffer);
        assert_eq!(fragments.len(), 1);
        assert!(matches!(fragments[0], Err(LlmError::Malformed(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let model = OllamaChatModel::new("http://localhost:11434/", "llama3");
        assert_eq!(&*model.base_url, "http://localhost:11434");
    }
}
