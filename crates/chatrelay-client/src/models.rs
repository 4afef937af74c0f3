use chatrelay_contracts::{ChatTurn, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER: &str = "openai";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Complete,
    /// Assistant reply still receiving content.
    Pending,
    /// Generation was stopped by the user; the content is partial.
    Stopped,
}

/// One visible transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn with_role(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into(), MessageStatus::Complete)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into(), MessageStatus::Complete)
    }

    pub fn pending_assistant() -> Self {
        Self::with_role(Role::Assistant, String::new(), MessageStatus::Pending)
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Per-conversation generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub provider: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
            temperature: None,
            system_prompt: None,
        }
    }
}

/// Persisted session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TITLE_MAX_CHARS: usize = 48;

impl SessionRecord {
    /// New session titled after its first user message.
    pub fn titled_from(id: impl Into<String>, first_message: &str) -> Self {
        let now = Utc::now();
        let first_line = first_message.lines().next().unwrap_or_default().trim();
        let mut title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
        if first_line.chars().count() > TITLE_MAX_CHARS {
            title.push('…');
        }
        if title.is_empty() {
            title = "New chat".to_string();
        }
        Self {
            id: id.into(),
            title,
            assistant_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
