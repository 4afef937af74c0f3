//! LLM client trait and types

use std::pin::Pin;

use chatrelay_contracts::ChatTurn;
use futures::Stream;

use crate::error::Result;

/// Reason the upstream stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
        }
    }

    pub fn final_chunk(reason: FinishReason) -> Self {
        Self {
            text: String::new(),
            finish_reason: Some(reason),
        }
    }
}

/// Lazy, finite, non-restartable sequence of chunks.
///
/// The first `Err` item ends the stream; implementations never yield after it.
pub type StreamResult = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Streaming completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatTurn>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Insert a system turn ahead of the conversation.
    pub fn with_leading_system(mut self, content: impl Into<String>) -> Self {
        self.messages.insert(0, ChatTurn::system(content));
        self
    }

    /// Content of the most recent user turn, falling back to the last turn.
    pub fn latest_user_content(&self) -> Option<&str> {
        use chatrelay_contracts::Role;

        self.messages
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .or(self.messages.last())
            .map(|turn| turn.content.as_str())
    }
}

/// LLM client trait
pub trait LlmClient: Send + Sync {
    /// Get provider name
    fn provider(&self) -> &str;

    /// Model used when the request does not name one
    fn model(&self) -> &str;

    /// Open a streaming completion. No network traffic happens until the
    /// returned stream is first polled.
    fn complete_stream(&self, request: CompletionRequest) -> StreamResult;
}
