//! LLM module - streaming clients behind a uniform chunk stream

mod assistants;
mod client;
mod http_error;
#[cfg(any(test, feature = "test-utils"))]
mod mock_client;
mod openai;
mod provider;

pub use assistants::{AssistantBackend, AssistantsClient, Run, RunStatus};
pub use client::{CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult};
pub use http_error::response_to_error;
#[cfg(any(test, feature = "test-utils"))]
pub use mock_client::{MockLlmClient, MockStep};
pub use openai::OpenAIClient;
pub use provider::Provider;
