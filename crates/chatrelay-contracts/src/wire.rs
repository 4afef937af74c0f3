//! JSON shapes exchanged between the orchestrator and the relay.

use serde::{Deserialize, Serialize};

/// Role of a chat turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Single turn of conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat/{provider}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Ordered by conversation turn, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl ChatRequest {
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

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    /// Content of the turn an assistant-style backend should answer.
    ///
    /// Prefers the trailing user turn and falls back to whatever turn is last,
    /// so a history ending on a system note still forwards something.
    pub fn latest_user_content(&self) -> Option<&str> {
        let last = self.messages.last()?;
        if last.role == Role::User {
            return Some(last.content.as_str());
        }
        self.messages
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .or(Some(last))
            .map(|turn| turn.content.as_str())
    }
}

/// One decoded relay event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Content { content: String },
    Error { error: String },
    Done,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        StreamEvent::Content {
            content: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
        }
    }

    /// `error` and `done` end a relay session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Done)
    }
}

/// JSON body of a rejection sent before any streaming begins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_wire_shapes() {
        assert_eq!(
            serde_json::to_value(StreamEvent::content("Hi")).unwrap(),
            json!({"type": "content", "content": "Hi"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::error("rate limited")).unwrap(),
            json!({"type": "error", "error": "rate limited"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Done).unwrap(),
            json!({"type": "done"})
        );
    }

    #[test]
    fn test_chat_request_accepts_camel_case_and_missing_fields() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hello"}],
            "model": "gpt-4o-mini",
            "assistantId": "asst_123"
        }))
        .unwrap();

        assert_eq!(request.messages, vec![ChatTurn::user("hello")]);
        assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(request.assistant_id.as_deref(), Some("asst_123"));
        assert!(request.temperature.is_none());
        assert!(request.workspace_id.is_none());

        let empty: ChatRequest = serde_json::from_value(json!({})).unwrap();
        assert!(empty.messages.is_empty());
    }

    #[test]
    fn test_chat_request_rejects_unknown_role() {
        let result: Result<ChatRequest, _> = serde_json::from_value(json!({
            "messages": [{"role": "tool", "content": "x"}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_latest_user_content() {
        let request = ChatRequest::new(vec![
            ChatTurn::system("be brief"),
            ChatTurn::user("first"),
            ChatTurn::assistant("reply"),
            ChatTurn::user("second"),
        ]);
        assert_eq!(request.latest_user_content(), Some("second"));

        let trailing_assistant =
            ChatRequest::new(vec![ChatTurn::user("q"), ChatTurn::assistant("a")]);
        assert_eq!(trailing_assistant.latest_user_content(), Some("q"));

        let system_only = ChatRequest::new(vec![ChatTurn::system("note")]);
        assert_eq!(system_only.latest_user_content(), Some("note"));

        assert_eq!(ChatRequest::default().latest_user_content(), None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::error("x").is_terminal());
        assert!(!StreamEvent::content("x").is_terminal());
    }
}
