//! Deterministic mock LLM client for relay and consumer tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::AiError;

use super::{CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult};

/// Deterministic step for scripted mock streams.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Yield one text token.
    Token(String),
    /// Yield an upstream failure and end the stream.
    Error(String),
    /// Sleep before the next step.
    Delay(u64),
}

impl MockStep {
    pub fn token(content: impl Into<String>) -> Self {
        MockStep::Token(content.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        MockStep::Error(message.into())
    }

    pub fn delay(ms: u64) -> Self {
        MockStep::Delay(ms)
    }
}

/// A mock LLM client that replays the same script on every stream.
///
/// A script that runs out without an error ends with a `Stop` final chunk.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    steps: Arc<Vec<MockStep>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self::from_steps(model, Vec::new())
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            steps: Arc::new(steps),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience for a script of plain tokens.
    pub fn with_tokens(model: impl Into<String>, tokens: &[&str]) -> Self {
        Self::from_steps(model, tokens.iter().map(|t| MockStep::token(*t)).collect())
    }

    /// Number of streams that reached the upstream (were polled at least once).
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let steps = self.steps.clone();
        let requests = self.requests.clone();

        Box::pin(async_stream::stream! {
            requests.lock().push(request);

            for step in steps.iter() {
                match step {
                    MockStep::Token(text) => yield Ok(StreamChunk::text(text.clone())),
                    MockStep::Error(message) => {
                        yield Err(AiError::Upstream(message.clone()));
                        return;
                    }
                    MockStep::Delay(ms) => sleep(Duration::from_millis(*ms)).await,
                }
            }

            yield Ok(StreamChunk::final_chunk(FinishReason::Stop));
        })
    }
}
