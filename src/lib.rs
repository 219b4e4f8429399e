//! # ragline
//!
//! Tenant-isolated RAG chat pipeline with a semantic response cache, token
//! streaming, and resumable conversation threads.
//!
//! Every user message runs a small state machine: a semantic cache lookup
//! that can answer instantly from a previous, similar question; otherwise a
//! rephrase of the question against the thread's history, tenant-scoped
//! document retrieval, and streamed answer generation with a write-back into
//! the cache. Conversation history is checkpointed after every stage, so a
//! thread survives process restarts.
//!
//! ```text
//!  user message
//!       │
//!       ▼
//!  CHECK_CACHE ──hit──────────────────────────► stream cached answer
//!       │ miss
//!       ▼
//!  CONTEXTUALIZE ──► RETRIEVE ──► GENERATE ───► stream generated answer
//!                                     │
//!                                     └──► cache write (best effort)
//! ```
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use ragline::cache::MemorySemanticCache;
//! use ragline::embeddings::{MockEmbeddingProvider, SharedEmbedder};
//! use ragline::index::MemoryDocumentIndex;
//! use ragline::llm::StaticChatModel;
//! use ragline::pipeline::Pipeline;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pipeline = Pipeline::builder()
//!     .with_embedder(SharedEmbedder::from_provider(Arc::new(MockEmbeddingProvider::new())))
//!     .with_cache(Arc::new(MemorySemanticCache::new()))
//!     .with_document_index(Arc::new(MemoryDocumentIndex::new()))
//!     .with_chat_model(Arc::new(StaticChatModel::new("We ship worldwide.")))
//!     .build()
//!     .unwrap();
//!
//! let events = pipeline.stream("Do you ship to Canada?", "tenant-a", "thread-1");
//! let events = events.collect().await;
//! assert!(events.last().unwrap().is_end());
//! # });
//! ```
//!
//! Production deployments swap the mocks for the [`providers`] HTTP clients,
//! a real cache/index backend behind the same traits, and the
//! [`checkpoint::SqliteCheckpointer`] for durable threads.
//!
//! ## Module guide
//!
//! - [`pipeline`] — the orchestrator, builder, and the four stages
//! - [`events`] — the typed client-facing event stream
//! - [`state`] / [`message`] — conversation state and history
//! - [`cache`], [`index`], [`embeddings`], [`llm`] — collaborator seams with
//!   in-memory/mock implementations
//! - [`providers`] — Ollama HTTP backends
//! - [`checkpoint`] — durable thread storage
//! - [`config`], [`telemetry`] — tuning knobs and tracing setup

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod embeddings;
pub mod events;
pub mod index;
pub mod llm;
pub mod message;
pub mod pipeline;
pub mod providers;
pub mod stage;
pub mod state;
pub mod telemetry;
