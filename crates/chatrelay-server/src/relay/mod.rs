//! Stream relay: one upstream completion re-encoded as a `StreamEvent` sequence.
//!
//! A session walks `Idle → Validating → (Rejected | Streaming) → (Completed | Failed)`.
//! Rejections happen before any upstream traffic and surface as plain JSON
//! errors; once streaming, every outcome is an in-band frame. A stream emits
//! content frames in upstream order followed by exactly one terminal frame.

pub mod augmentation;

use std::fmt;
use std::sync::Arc;

use chatrelay_ai::{CompletionRequest, KnowledgeSource, LlmClient, Provider, StreamResult};
use chatrelay_contracts::StreamEvent;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::config::RetrievalSettings;
use crate::upstream::UpstreamFactory;

/// Validation failures that stop a session before streaming starts
#[derive(Debug, Error, PartialEq)]
pub enum RelayError {
    #[error("{} API key not configured", .0.display_name())]
    MissingCredential(Provider),

    #[error("A user message is required")]
    MissingUserMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Validating,
    Rejected,
    Streaming,
    Completed,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Validating => "validating",
            SessionPhase::Rejected => "rejected",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Rejected | SessionPhase::Completed | SessionPhase::Failed
        )
    }

    fn can_advance_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Streaming)
                | (Streaming, Completed)
                | (Streaming, Failed)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request's trip through the relay
pub struct RelaySession {
    id: String,
    route: &'static str,
    phase: SessionPhase,
    emitted: usize,
    span: tracing::Span,
}

impl RelaySession {
    pub fn new(route: &'static str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("relay_session", session_id = %id, route);
        Self {
            id,
            route,
            phase: SessionPhase::Idle,
            emitted: 0,
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        let _enter = self.span.enter();
        if !self.phase.can_advance_to(next) {
            tracing::warn!(from = %self.phase, to = %next, "Ignoring illegal session transition");
            return false;
        }
        tracing::debug!(from = %self.phase, phase = %next, "Session transition");
        self.phase = next;
        true
    }

    pub fn begin_validation(&mut self) {
        self.advance(SessionPhase::Validating);
    }

    pub fn reject(&mut self, error: &RelayError) {
        if self.advance(SessionPhase::Rejected) {
            let _enter = self.span.enter();
            tracing::info!(route = self.route, error = %error, "Relay request rejected");
        }
    }

    pub fn start_streaming(&mut self) {
        self.advance(SessionPhase::Streaming);
    }

    fn record_content(&mut self) {
        self.emitted += 1;
    }

    fn complete(&mut self) {
        if self.advance(SessionPhase::Completed) {
            let _enter = self.span.enter();
            tracing::info!(frames = self.emitted, "Relay session completed");
        }
    }

    fn fail(&mut self, error: &str) {
        if self.advance(SessionPhase::Failed) {
            let _enter = self.span.enter();
            tracing::warn!(frames = self.emitted, error, "Relay session failed");
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if self.phase == SessionPhase::Streaming {
            let _enter = self.span.enter();
            tracing::info!(
                frames = self.emitted,
                "Client went away mid-stream, abandoning upstream request"
            );
        }
    }
}

/// Re-encode an upstream chunk stream as relay events.
///
/// Empty tokens are dropped. The first upstream error becomes the single
/// `error` frame; a clean end becomes the single `done` frame. Dropping the
/// returned stream drops `upstream`.
pub fn forward_upstream(
    mut session: RelaySession,
    mut upstream: StreamResult,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        if session.phase() != SessionPhase::Streaming {
            session.start_streaming();
        }

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    if !chunk.text.is_empty() {
                        session.record_content();
                        yield StreamEvent::content(chunk.text);
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    session.fail(&message);
                    yield StreamEvent::error(message);
                    return;
                }
            }
        }

        session.complete();
        yield StreamEvent::Done;
    }
}

/// Which upstream answers a validated request
pub enum RelayBackend {
    Completions { provider: Provider },
    Assistant { assistant_id: String },
}

/// Everything a validated request needs to start streaming
pub struct RelayPlan {
    pub backend: RelayBackend,
    pub api_key: String,
    pub request: CompletionRequest,
    pub knowledge: Option<Arc<dyn KnowledgeSource>>,
    pub retrieval: RetrievalSettings,
}

/// Run augmentation, open the upstream stream and forward it.
///
/// Nothing here runs until the returned stream is polled.
pub fn relay_events(
    session: RelaySession,
    plan: RelayPlan,
    upstream: Arc<dyn UpstreamFactory>,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let RelayPlan { backend, api_key, request, knowledge, retrieval } = plan;

        let (client, request): (Arc<dyn LlmClient>, CompletionRequest) = match backend {
            RelayBackend::Assistant { assistant_id } => {
                let instructions = match &knowledge {
                    Some(source) => {
                        augmentation::assistant_instructions(source.as_ref(), &retrieval)
                            .await
                    }
                    None => None,
                };
                (upstream.assistant_client(&api_key, &assistant_id, instructions), request)
            }
            RelayBackend::Completions { provider } => {
                let request = match &knowledge {
                    Some(source) => {
                        augmentation::augment_completion(source.as_ref(), request, &retrieval).await
                    }
                    None => request,
                };
                (upstream.chat_client(provider, &api_key), request)
            }
        };

        tracing::debug!(
            parent: &session.span(),
            provider = client.provider(),
            model = client.model(),
            "Opening upstream stream"
        );
        let mut events = Box::pin(forward_upstream(session, client.complete_stream(request)));
        while let Some(event) = events.next().await {
            yield event;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_ai::{MockLlmClient, MockStep};
    use chatrelay_contracts::ChatTurn;

    fn streaming_session() -> RelaySession {
        let mut session = RelaySession::new("test");
        session.begin_validation();
        session.start_streaming();
        session
    }

    async fn relay(client: &MockLlmClient) -> Vec<StreamEvent> {
        let upstream = client.complete_stream(CompletionRequest::new(vec![ChatTurn::user("hello")]));
        forward_upstream(streaming_session(), upstream).collect().await
    }

    #[test]
    fn test_transition_table() {
        let mut session = RelaySession::new("test");
        assert_eq!(session.phase(), SessionPhase::Idle);

        assert!(!session.advance(SessionPhase::Streaming));
        assert!(session.advance(SessionPhase::Validating));
        assert!(session.advance(SessionPhase::Streaming));
        assert!(!session.advance(SessionPhase::Rejected));
        assert!(session.advance(SessionPhase::Completed));
        assert!(session.phase().is_terminal());
        assert!(!session.advance(SessionPhase::Failed));
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(
            RelayError::MissingCredential(Provider::OpenAI).to_string(),
            "OpenAI API key not configured"
        );
        assert_eq!(
            RelayError::MissingCredential(Provider::Groq).to_string(),
            "Groq API key not configured"
        );
    }

    #[tokio::test]
    async fn test_tokens_then_single_done() {
        let client = MockLlmClient::with_tokens("mock", &["Hi", "", " there"]);
        let events = relay(&client).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::content("Hi"),
                StreamEvent::content(" there"),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_single_error_without_done() {
        let client = MockLlmClient::from_steps(
            "mock",
            vec![MockStep::token("Hi"), MockStep::error("rate limited")],
        );
        let events = relay(&client).await;

        assert_eq!(
            events,
            vec![StreamEvent::content("Hi"), StreamEvent::error("rate limited")]
        );
    }

    #[tokio::test]
    async fn test_immediate_failure() {
        let client = MockLlmClient::from_steps("mock", vec![MockStep::error("boom")]);
        let events = relay(&client).await;
        assert_eq!(events, vec![StreamEvent::error("boom")]);
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_frame_for_many_scripts() {
        let scripts: Vec<Vec<MockStep>> = vec![
            vec![],
            vec![MockStep::token("a")],
            vec![MockStep::token("a"), MockStep::token("b"), MockStep::token("c")],
            vec![MockStep::error("e")],
            vec![MockStep::token("a"), MockStep::delay(1), MockStep::error("e")],
        ];

        for steps in scripts {
            let client = MockLlmClient::from_steps("mock", steps);
            let events = relay(&client).await;
            let terminal: Vec<usize> = events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_terminal())
                .map(|(i, _)| i)
                .collect();
            assert_eq!(terminal, vec![events.len() - 1]);
        }
    }

    #[tokio::test]
    async fn test_dropping_relay_stream_abandons_upstream() {
        let client = MockLlmClient::from_steps(
            "mock",
            vec![MockStep::token("Hi"), MockStep::delay(60_000), MockStep::token("late")],
        );
        let upstream = client.complete_stream(CompletionRequest::default());
        let mut events = Box::pin(forward_upstream(streaming_session(), upstream));

        assert_eq!(events.next().await, Some(StreamEvent::content("Hi")));
        drop(events);
        assert_eq!(client.call_count(), 1);
    }
}
