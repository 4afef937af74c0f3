//! Transcript persistence used by the orchestrator.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chatrelay_storage::Storage;
use parking_lot::RwLock;

use crate::models::{ChatMessage, SessionRecord};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_session(&self, session: &SessionRecord) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    async fn append_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()>;

    /// Make the stored transcript equal `messages`.
    async fn replace_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

fn sort_recent_first(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, SessionRecord>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// Process-local store, lost on exit
#[derive(Default, Clone)]
pub struct InMemoryMessageStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        self.inner
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.inner.read().sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<_> = self.inner.read().sessions.values().cloned().collect();
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .inner
            .read()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        self.inner
            .write()
            .messages
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn replace_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        self.inner
            .write()
            .messages
            .insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.sessions.remove(session_id);
        inner.messages.remove(session_id);
        Ok(())
    }
}

/// Typed JSON wrapper over the redb byte store
#[derive(Clone)]
pub struct RedbMessageStore {
    storage: Arc<Storage>,
}

impl RedbMessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            storage: Arc::new(Storage::new(path)?),
        })
    }

    fn decode_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.storage
            .chat_messages
            .list_raw(session_id)?
            .iter()
            .map(|bytes| Ok(serde_json::from_slice(bytes)?))
            .collect()
    }

    fn encode(messages: &[ChatMessage]) -> Result<Vec<Vec<u8>>> {
        messages
            .iter()
            .map(|m| Ok(serde_json::to_vec(m)?))
            .collect()
    }
}

#[async_trait]
impl MessageStore for RedbMessageStore {
    async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        let json = serde_json::to_vec(session)?;
        self.storage.chat_sessions.put_raw(&session.id, &json)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        match self.storage.chat_sessions.get_raw(session_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        for (id, bytes) in self.storage.chat_sessions.list_raw()? {
            match serde_json::from_slice::<SessionRecord>(&bytes) {
                Ok(session) => sessions.push(session),
                Err(err) => tracing::warn!(session_id = %id, error = %err, "Skipping unreadable session"),
            }
        }
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.decode_messages(session_id)
    }

    async fn append_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let encoded = Self::encode(messages)?;
        let entries: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();
        self.storage
            .chat_messages
            .append_many_raw(session_id, &entries)?;
        Ok(())
    }

    /// Keeps the longest stored prefix whose ids match and swaps in the rest in one transaction.
    async fn replace_messages(&self, session_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let stored = self.decode_messages(session_id)?;
        let shared = stored
            .iter()
            .zip(messages)
            .take_while(|(old, new)| old.id == new.id)
            .count();

        let encoded = Self::encode(&messages[shared..])?;
        let entries: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();
        let removed = self
            .storage
            .chat_messages
            .replace_tail(session_id, shared as u64, &entries)?;
        tracing::debug!(
            session_id,
            kept = shared,
            removed,
            appended = entries.len(),
            "Rewrote transcript tail"
        );
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.storage.chat_messages.delete_session(session_id)?;
        self.storage.chat_sessions.delete(session_id)?;
        Ok(())
    }
}
