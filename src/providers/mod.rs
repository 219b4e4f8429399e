//! Concrete model backends.
//!
//! Production deployments point the [`ChatModel`](crate::llm::ChatModel) and
//! [`EmbeddingProvider`](crate::embeddings::EmbeddingProvider) seams at these
//! HTTP clients; tests use the mock implementations that live next to the
//! traits.

pub mod ollama;

pub use ollama::{OllamaChatModel, OllamaEmbeddings};
