//! OpenAI Chat Completions streaming, also used for OpenAI-compatible providers

use chatrelay_contracts::{SseDecoder, SseFrame};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult};
use crate::llm::http_error::{response_to_error, upstream_error_message};
use crate::llm::provider::Provider;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// OpenAI client
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    provider: Provider,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::for_provider(Provider::OpenAI, api_key)
    }

    /// Client for any provider that speaks the Chat Completions protocol
    pub fn for_provider(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: provider.base_url().to_string(),
            temperature: DEFAULT_TEMPERATURE,
            provider,
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

// Streaming types

#[derive(Deserialize, Debug)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// What a single upstream frame asks the stream to do.
#[derive(Debug, PartialEq)]
pub(crate) enum FrameAction {
    Emit(Vec<StreamChunk>),
    Done,
}

/// Interpret one Chat Completions SSE frame.
pub(crate) fn interpret_frame(frame: &SseFrame) -> Result<FrameAction> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(FrameAction::Emit(Vec::new()));
    }
    if data == "[DONE]" {
        return Ok(FrameAction::Done);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| AiError::InvalidFormat(format!("chunk is not JSON: {}", e)))?;

    if let Some(message) = upstream_error_message(&json) {
        return Err(AiError::Upstream(message));
    }

    let parsed: ChatCompletionChunk = serde_json::from_value(json)
        .map_err(|e| AiError::InvalidFormat(format!("unexpected chunk shape: {}", e)))?;

    let mut chunks = Vec::new();
    for choice in parsed.choices {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            chunks.push(StreamChunk::text(content));
        }
        if let Some(reason) = choice.finish_reason {
            chunks.push(StreamChunk::final_chunk(FinishReason::from_openai(&reason)));
        }
    }
    Ok(FrameAction::Emit(chunks))
}

impl LlmClient for OpenAIClient {
    fn provider(&self) -> &str {
        self.provider.slug()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let temperature = request.temperature.unwrap_or(self.temperature);
        let provider = self.provider;

        Box::pin(async_stream::stream! {
            let mut body = serde_json::json!({
                "model": model,
                "messages": request.messages,
                "temperature": temperature,
                "stream": true,
            });
            if let Some(max_tokens) = request.max_tokens {
                body["max_tokens"] = max_tokens.into();
            }

            tracing::debug!(
                provider = provider.slug(),
                model = %model,
                turns = request.messages.len(),
                "Opening chat completion stream"
            );

            let response = match client
                .post(format!("{}/chat/completions", base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(AiError::Llm(format!("Request failed: {}", e)));
                    return;
                }
            };

            if !response.status().is_success() {
                yield Err(response_to_error(response, provider.display_name()).await);
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let (frames, eof) = match byte_stream.next().await {
                    Some(Ok(bytes)) => (decoder.push(&bytes), false),
                    Some(Err(e)) => {
                        yield Err(AiError::Llm(format!("Stream error: {}", e)));
                        return;
                    }
                    None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for frame in frames {
                    match interpret_frame(&frame) {
                        Ok(FrameAction::Emit(chunks)) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Ok(FrameAction::Done) => return,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                if eof {
                    return;
                }
            }
        })
    }
}
