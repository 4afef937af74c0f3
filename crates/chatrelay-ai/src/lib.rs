//! ChatRelay AI - upstream clients behind the stream relay
//!
//! This crate provides:
//! - A uniform streaming contract (`LlmClient` yielding `StreamChunk`s)
//! - OpenAI Chat Completions streaming, also used for OpenAI-compatible providers
//! - OpenAI Assistants v2 (streamed runs and polled runs)
//! - Vector store lookups used for best-effort augmentation
//! - Embedding providers with an in-memory cache

pub mod embedding;
pub mod error;
mod http_client;
pub mod llm;
pub mod vector_store;

// Re-export commonly used types
pub use embedding::{EmbeddingCache, EmbeddingConfig, EmbeddingProvider, OpenAIEmbedding};
pub use error::{AiError, Result};
pub use llm::{
    AssistantBackend, AssistantsClient, CompletionRequest, FinishReason, LlmClient, OpenAIClient,
    Provider, Run, RunStatus, StreamChunk, StreamResult,
};
#[cfg(any(test, feature = "test-utils"))]
pub use llm::{MockLlmClient, MockStep};
pub use vector_store::{KnowledgeSource, SearchHit, VectorStoreClient};
