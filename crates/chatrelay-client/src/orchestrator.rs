//! Chat session orchestrator.
//!
//! `ChatController` owns the visible conversation and drives one relay turn at
//! a time: optimistic user message, a pending assistant bubble filled by
//! content events, then finalize-and-persist on `done` or roll back on
//! failure. Starting a new turn cancels the previous one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatrelay_contracts::{ChatRequest, ChatTurn, Role, StreamEvent};
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::consumer::{ConsumeOutcome, consume_event_stream};
use crate::error::ChatError;
use crate::models::{ChatMessage, ChatSettings, MessageStatus, SessionRecord};
use crate::store::MessageStore;
use crate::transport::RelayTransport;

/// How a turn ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply finished. `persisted` is false when saving it failed.
    Completed { persisted: bool },
    /// The user stopped generation; the partial reply stays visible and unsaved.
    Stopped,
}

/// Snapshot of everything the UI renders
#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub assistant_id: Option<String>,
    pub settings: ChatSettings,
    pub is_generating: bool,
}

impl ChatState {
    fn fresh(settings: ChatSettings, assistant_id: Option<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            assistant_id,
            settings,
            is_generating: false,
        }
    }
}

struct Inner {
    state: ChatState,
    session: Option<SessionRecord>,
}

struct ActiveTurn {
    turn: u64,
    token: CancellationToken,
}

enum Terminal {
    Done,
    Failed(String),
}

pub struct ChatController {
    transport: Arc<dyn RelayTransport>,
    store: Arc<dyn MessageStore>,
    inner: Mutex<Inner>,
    active: Mutex<Option<ActiveTurn>>,
    turns: AtomicU64,
}

impl ChatController {
    pub fn new(transport: Arc<dyn RelayTransport>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            transport,
            store,
            inner: Mutex::new(Inner {
                state: ChatState::fresh(ChatSettings::default(), None),
                session: None,
            }),
            active: Mutex::new(None),
            turns: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ChatState {
        let mut state = self.inner.lock().state.clone();
        state.is_generating = self.active.lock().is_some();
        state
    }

    pub fn is_generating(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Cancel the in-flight turn, if any. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => {
                tracing::debug!(turn = active.turn, "Stopping generation");
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Start an empty conversation, keeping settings and assistant selection.
    pub fn new_chat(&self) {
        self.stop();
        let mut inner = self.inner.lock();
        let settings = inner.state.settings.clone();
        let assistant_id = inner.state.assistant_id.clone();
        inner.state = ChatState::fresh(settings, assistant_id);
        inner.session = None;
        tracing::debug!(session_id = %inner.state.session_id, "Started new chat");
    }

    pub fn select_assistant(&self, assistant_id: Option<String>) {
        let assistant_id = assistant_id.filter(|id| !id.trim().is_empty());
        self.inner.lock().state.assistant_id = assistant_id;
    }

    pub fn set_settings(&self, settings: ChatSettings) {
        self.inner.lock().state.settings = settings;
    }

    /// Replace the conversation with a stored session. Returns false if unknown.
    pub async fn load_session(&self, session_id: &str) -> anyhow::Result<bool> {
        let Some(record) = self.store.get_session(session_id).await? else {
            return Ok(false);
        };
        let messages = self.store.load_messages(session_id).await?;

        self.stop();
        let mut inner = self.inner.lock();
        inner.state.session_id = record.id.clone();
        inner.state.messages = messages;
        inner.state.assistant_id = record.assistant_id.clone();
        inner.session = Some(record);
        Ok(true)
    }

    pub async fn send_message(&self, content: &str) -> Result<TurnOutcome, ChatError> {
        self.send_message_with(content, |_| {}).await
    }

    /// Like `send_message`, calling `on_delta` with each content fragment.
    pub async fn send_message_with(
        &self,
        content: &str,
        on_delta: impl FnMut(&str) + Send,
    ) -> Result<TurnOutcome, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.run_turn(content.to_string(), on_delta).await
    }

    /// Drop the user message at `index` and everything after it, then send
    /// `content` in its place.
    pub async fn edit_and_resend(
        &self,
        index: usize,
        content: &str,
    ) -> Result<TurnOutcome, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (session_id, kept, saved) = {
            let mut inner = self.inner.lock();
            let is_user = inner
                .state
                .messages
                .get(index)
                .is_some_and(|m| m.role == Role::User);
            if !is_user {
                return Err(ChatError::NotAUserMessage(index));
            }
            inner.state.messages.truncate(index);
            let kept: Vec<ChatMessage> = inner
                .state
                .messages
                .iter()
                .filter(|m| m.status == MessageStatus::Complete)
                .cloned()
                .collect();
            (
                inner.state.session_id.clone(),
                kept,
                inner.session.is_some(),
            )
        };
        self.stop();

        if saved && let Err(err) = self.store.replace_messages(&session_id, &kept).await {
            tracing::warn!(session_id, error = %err, "Failed to rewrite stored transcript");
        }

        self.run_turn(content.to_string(), |_| {}).await
    }

    fn begin_turn(&self) -> (u64, CancellationToken) {
        let turn = self.turns.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self.active.lock().replace(ActiveTurn {
            turn,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(turn = previous.turn, "Cancelling superseded generation");
            previous.token.cancel();
        }
        (turn, token)
    }

    fn end_turn(&self, turn: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.turn == turn) {
            *active = None;
        }
    }

    async fn run_turn(
        &self,
        content: String,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> Result<TurnOutcome, ChatError> {
        let (turn, token) = self.begin_turn();

        let user = ChatMessage::user(content);
        let pending = ChatMessage::pending_assistant();
        let (user_id, pending_id) = (user.id.clone(), pending.id.clone());

        let (provider, request) = {
            let mut inner = self.inner.lock();
            inner.state.messages.push(user);
            let request = build_request(&inner.state);
            inner.state.messages.push(pending);
            (inner.state.settings.provider.clone(), request)
        };

        tracing::info!(turn, provider = %provider, turns = request.messages.len(), "Sending chat turn");

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = self.transport.open_stream(&provider, &request) => Some(opened),
        };

        let stream = match opened {
            None => {
                self.mark_stopped(&pending_id);
                self.end_turn(turn);
                return Ok(TurnOutcome::Stopped);
            }
            Some(Err(err)) => {
                self.rollback(&user_id, &pending_id);
                self.end_turn(turn);
                return Err(err.into());
            }
            Some(Ok(stream)) => stream,
        };

        let mut terminal: Option<Terminal> = None;
        let consumed = consume_event_stream(stream, &token, |event| {
            if terminal.is_some() {
                return;
            }
            match event {
                StreamEvent::Content { content } => {
                    self.append_to(&pending_id, &content);
                    on_delta(&content);
                }
                StreamEvent::Done => terminal = Some(Terminal::Done),
                StreamEvent::Error { error } => terminal = Some(Terminal::Failed(error)),
            }
        })
        .await;

        let result = match (terminal, consumed) {
            (Some(Terminal::Done), _) => {
                let persisted = self.finalize(&user_id, &pending_id).await;
                Ok(TurnOutcome::Completed { persisted })
            }
            (Some(Terminal::Failed(error)), _) => {
                self.rollback(&user_id, &pending_id);
                Err(ChatError::Upstream(error))
            }
            (None, Ok(ConsumeOutcome::Cancelled)) => {
                self.mark_stopped(&pending_id);
                Ok(TurnOutcome::Stopped)
            }
            (None, Ok(ConsumeOutcome::Completed)) => {
                self.rollback(&user_id, &pending_id);
                Err(ChatError::Incomplete)
            }
            (None, Err(err)) => {
                self.rollback(&user_id, &pending_id);
                Err(err.into())
            }
        };

        match &result {
            Ok(outcome) => tracing::info!(turn, ?outcome, "Chat turn finished"),
            Err(err) => tracing::warn!(turn, error = %err, "Chat turn failed"),
        }
        self.end_turn(turn);
        result
    }

    fn append_to(&self, message_id: &str, text: &str) {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.state.messages.iter_mut().find(|m| m.id == message_id) {
            message.content.push_str(text);
        }
    }

    fn mark_stopped(&self, message_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.state.messages.iter_mut().find(|m| m.id == message_id) {
            message.status = MessageStatus::Stopped;
        }
    }

    fn rollback(&self, user_id: &str, pending_id: &str) {
        self.inner
            .lock()
            .state
            .messages
            .retain(|m| m.id != user_id && m.id != pending_id);
    }

    /// Mark the reply complete and persist the pair. Returns whether saving worked.
    async fn finalize(&self, user_id: &str, pending_id: &str) -> bool {
        let (session_id, pair, record) = {
            let mut inner = self.inner.lock();
            if let Some(message) = inner.state.messages.iter_mut().find(|m| m.id == pending_id) {
                message.status = MessageStatus::Complete;
            }
            let pair: Vec<ChatMessage> = inner
                .state
                .messages
                .iter()
                .filter(|m| m.id == user_id || m.id == pending_id)
                .cloned()
                .collect();

            let session_id = inner.state.session_id.clone();
            let mut record = match inner.session.clone() {
                Some(record) => record,
                None => {
                    let first = pair.first().map(|m| m.content.as_str()).unwrap_or_default();
                    SessionRecord::titled_from(session_id.clone(), first)
                }
            };
            record.assistant_id = inner.state.assistant_id.clone();
            record.updated_at = Utc::now();
            (session_id, pair, record)
        };

        let saved = async {
            self.store.save_session(&record).await?;
            self.store.append_messages(&session_id, &pair).await
        }
        .await;

        match saved {
            Ok(()) => {
                let mut inner = self.inner.lock();
                if inner.state.session_id == session_id {
                    inner.session = Some(record);
                }
                true
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Failed to persist chat turn");
                false
            }
        }
    }
}

fn build_request(state: &ChatState) -> ChatRequest {
    let mut messages: Vec<ChatTurn> = Vec::with_capacity(state.messages.len() + 1);
    if let Some(prompt) = state
        .settings
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        messages.push(ChatTurn::system(prompt));
    }
    messages.extend(
        state
            .messages
            .iter()
            .filter(|m| m.status != MessageStatus::Pending && !m.content.is_empty())
            .map(ChatMessage::to_turn),
    );

    let mut request = ChatRequest::new(messages);
    request.model = state.settings.model.clone();
    request.temperature = state.settings.temperature;
    request.assistant_id = state.assistant_id.clone();
    request
}
