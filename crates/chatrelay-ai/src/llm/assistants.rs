//! OpenAI Assistants v2: streamed runs for the relay and polled runs for
//! the non-streaming send-message route.

use std::fmt;

use chatrelay_contracts::{SseDecoder, SseFrame};
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::client::{CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult};
use crate::llm::http_error::{response_to_error, upstream_error_message};
use crate::llm::provider::Provider;

const ASSISTANTS_BETA: &str = "assistants=v2";
const PROVIDER_NAME: &str = "OpenAI";

/// Lifecycle status of an assistant run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Other(status) => status,
        }
    }

    /// Whether polling should continue
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }
}

impl From<String> for RunStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "requires_action" => RunStatus::RequiresAction,
            "cancelling" => RunStatus::Cancelling,
            "cancelled" => RunStatus::Cancelled,
            "failed" => RunStatus::Failed,
            "completed" => RunStatus::Completed,
            "incomplete" => RunStatus::Incomplete,
            "expired" => RunStatus::Expired,
            _ => RunStatus::Other(status),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Clone, Deserialize)]
struct RunError {
    message: String,
}

impl Run {
    fn failure_message(&self) -> String {
        match &self.last_error {
            Some(error) if !error.message.is_empty() => error.message.clone(),
            _ => format!("Assistant run failed with status: {}", self.status),
        }
    }
}

#[derive(Deserialize)]
struct Thread {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    r#type: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    content: Vec<MessageContent>,
}

/// Client for the Assistants v2 endpoints
#[derive(Clone)]
pub struct AssistantsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AssistantsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            base_url: Provider::OpenAI.base_url().to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response, PROVIDER_NAME).await);
        }
        Ok(response)
    }

    pub async fn create_thread(&self) -> Result<String> {
        let response = Self::send(self.request(Method::POST, "/threads").json(&json!({}))).await?;
        let thread: Thread = response.json().await?;
        tracing::debug!(thread_id = %thread.id, "Created assistant thread");
        Ok(thread.id)
    }

    pub async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let path = format!("/threads/{}/messages", thread_id);
        Self::send(
            self.request(Method::POST, &path)
                .json(&json!({ "role": "user", "content": content })),
        )
        .await?;
        Ok(())
    }

    pub async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let path = format!("/threads/{}/runs", thread_id);
        let response = Self::send(
            self.request(Method::POST, &path)
                .json(&json!({ "assistant_id": assistant_id })),
        )
        .await?;
        Ok(response.json().await?)
    }

    pub async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let path = format!("/threads/{}/runs/{}", thread_id, run_id);
        let response = Self::send(self.request(Method::GET, &path)).await?;
        Ok(response.json().await?)
    }

    /// Text of the assistant message produced by `run_id`, if any.
    pub async fn latest_assistant_reply(
        &self,
        thread_id: &str,
        run_id: &str,
    ) -> Result<Option<String>> {
        let path = format!("/threads/{}/messages?order=desc&limit=20", thread_id);
        let response = Self::send(self.request(Method::GET, &path)).await?;
        let list: MessageList = response.json().await?;

        let reply = list
            .data
            .into_iter()
            .find(|msg| msg.role == "assistant" && msg.run_id.as_deref() == Some(run_id))
            .and_then(|msg| msg.content.into_iter().next())
            .filter(|content| content.r#type == "text")
            .and_then(|content| content.text)
            .map(|text| text.value);

        Ok(reply)
    }

    /// Start a streamed run. The request is sent when the stream is first polled.
    pub fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<String>,
    ) -> StreamResult {
        let path = format!("/threads/{}/runs", thread_id);
        let mut body = json!({ "assistant_id": assistant_id, "stream": true });
        if let Some(instructions) = additional_instructions {
            body["additional_instructions"] = Value::String(instructions);
        }
        let builder = self.request(Method::POST, &path).json(&body);

        Box::pin(async_stream::stream! {
            let response = match Self::send(builder).await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

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
                    match interpret_run_event(&frame) {
                        Ok(RunEvent::Text(chunks)) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Ok(RunEvent::Completed) => {
                            yield Ok(StreamChunk::final_chunk(FinishReason::Stop));
                            return;
                        }
                        Ok(RunEvent::Done) => return,
                        Ok(RunEvent::Ignored) => {}
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

#[derive(Debug, PartialEq)]
pub(crate) enum RunEvent {
    Text(Vec<StreamChunk>),
    Completed,
    Done,
    Ignored,
}

/// Interpret one event of a streamed run.
pub(crate) fn interpret_run_event(frame: &SseFrame) -> Result<RunEvent> {
    let Some(event) = frame.event.as_deref() else {
        return Ok(RunEvent::Ignored);
    };

    match event {
        "thread.message.delta" => {
            let delta: MessageDelta = serde_json::from_str(&frame.data)
                .map_err(|e| AiError::InvalidFormat(format!("unexpected message delta: {}", e)))?;
            let chunks = delta
                .delta
                .content
                .into_iter()
                .filter(|content| content.r#type == "text")
                .filter_map(|content| content.text)
                .filter(|text| !text.value.is_empty())
                .map(|text| StreamChunk::text(text.value))
                .collect();
            Ok(RunEvent::Text(chunks))
        }
        "thread.run.completed" => Ok(RunEvent::Completed),
        "thread.run.failed" | "thread.run.cancelled" | "thread.run.expired"
        | "thread.run.incomplete" => {
            let run: Run = serde_json::from_str(&frame.data)
                .map_err(|e| AiError::InvalidFormat(format!("unexpected run payload: {}", e)))?;
            Err(AiError::Upstream(run.failure_message()))
        }
        "thread.run.requires_action" => Err(AiError::Upstream(
            "Assistant run requires tool outputs, which the relay does not provide".to_string(),
        )),
        "error" => {
            let message = serde_json::from_str::<Value>(&frame.data)
                .ok()
                .and_then(|json| {
                    upstream_error_message(&json).or_else(|| {
                        json.get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                })
                .unwrap_or_else(|| frame.data.clone());
            Err(AiError::Upstream(message))
        }
        "done" => Ok(RunEvent::Done),
        _ => Ok(RunEvent::Ignored),
    }
}

/// `LlmClient` adapter that answers through an assistant.
///
/// Each completion creates a fresh thread, posts only the latest user turn and
/// streams the run.
pub struct AssistantBackend {
    client: AssistantsClient,
    assistant_id: String,
    additional_instructions: Option<String>,
}

impl AssistantBackend {
    pub fn new(client: AssistantsClient, assistant_id: impl Into<String>) -> Self {
        Self {
            client,
            assistant_id: assistant_id.into(),
            additional_instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.additional_instructions = instructions;
        self
    }
}

impl LlmClient for AssistantBackend {
    fn provider(&self) -> &str {
        "openai-assistants"
    }

    fn model(&self) -> &str {
        &self.assistant_id
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let assistant_id = self.assistant_id.clone();
        let instructions = self.additional_instructions.clone();
        let latest = request
            .latest_user_content()
            .map(str::to_string)
            .filter(|content| !content.trim().is_empty());

        Box::pin(async_stream::stream! {
            let thread_id = match client.create_thread().await {
                Ok(id) => id,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            if let Some(content) = latest {
                if let Err(err) = client.add_user_message(&thread_id, &content).await {
                    yield Err(err);
                    return;
                }
            }

            let mut run = client.stream_run(&thread_id, &assistant_id, instructions);
            while let Some(item) = run.next().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: &str) -> SseFrame {
        SseFrame {
            event: Some(name.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_run_status_parsing() {
        assert_eq!(RunStatus::from("in_progress".to_string()), RunStatus::InProgress);
        assert!(RunStatus::Queued.is_pending());
        assert!(!RunStatus::Completed.is_pending());
        let other = RunStatus::from("paused".to_string());
        assert_eq!(other.to_string(), "paused");
    }

    #[test]
    fn test_message_delta_yields_text() {
        let frame = event(
            "thread.message.delta",
            r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[{"index":0,"type":"text","text":{"value":"Hi","annotations":[]}}]}}"#,
        );
        assert_eq!(
            interpret_run_event(&frame).unwrap(),
            RunEvent::Text(vec![StreamChunk::text("Hi")])
        );
    }

    #[test]
    fn test_completion_and_done() {
        assert_eq!(
            interpret_run_event(&event("thread.run.completed", "{}")).unwrap(),
            RunEvent::Completed
        );
        assert_eq!(interpret_run_event(&event("done", "[DONE]")).unwrap(), RunEvent::Done);
        assert_eq!(
            interpret_run_event(&event("thread.run.step.created", "{}")).unwrap(),
            RunEvent::Ignored
        );
    }

    #[test]
    fn test_failed_run_uses_last_error() {
        let frame = event(
            "thread.run.failed",
            r#"{"id":"run_1","status":"failed","last_error":{"code":"rate_limit_exceeded","message":"rate limited"}}"#,
        );
        let err = interpret_run_event(&frame).unwrap_err();
        assert_eq!(err.to_string(), "rate limited");

        let frame = event("thread.run.expired", r#"{"id":"run_1","status":"expired"}"#);
        let err = interpret_run_event(&frame).unwrap_err();
        assert_eq!(err.to_string(), "Assistant run failed with status: expired");
    }

    #[test]
    fn test_error_event() {
        let err = interpret_run_event(&event("error", r#"{"message":"server overloaded"}"#))
            .unwrap_err();
        assert_eq!(err.to_string(), "server overloaded");
    }
}
