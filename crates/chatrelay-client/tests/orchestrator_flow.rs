use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_client::{
    ByteStream, ChatController, ChatError, ChatMessage, ChatSettings, ClientError,
    InMemoryMessageStore, MessageStatus, MessageStore, RelayTransport, SessionRecord, TurnOutcome,
};
use chatrelay_contracts::{ChatRequest, Role, StreamEvent, encode_data_frame};
use futures::{StreamExt, stream};
use parking_lot::Mutex;

enum Script {
    Events { events: Vec<StreamEvent>, stall: bool },
    Reject { status: u16, message: &'static str },
}

#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<(String, ChatRequest)>>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<(String, ChatRequest)> {
        self.requests.lock().clone()
    }
}

fn events(events: Vec<StreamEvent>) -> Script {
    Script::Events {
        events,
        stall: false,
    }
}

#[async_trait]
impl RelayTransport for ScriptedTransport {
    async fn open_stream(
        &self,
        provider: &str,
        request: &ChatRequest,
    ) -> Result<ByteStream, ClientError> {
        self.requests
            .lock()
            .push((provider.to_string(), request.clone()));
        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Events { events, stall }) => {
                let frames: Vec<Result<Bytes, ClientError>> = events
                    .iter()
                    .map(|e| Ok(Bytes::from(encode_data_frame(e))))
                    .collect();
                let head = stream::iter(frames);
                if stall {
                    Ok(Box::pin(head.chain(stream::pending())))
                } else {
                    Ok(Box::pin(head))
                }
            }
            Some(Script::Reject { status, message }) => Err(ClientError::Rejected {
                status,
                message: message.to_string(),
            }),
            None => Err(ClientError::Transport("no script".to_string())),
        }
    }
}

struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn save_session(&self, _session: &SessionRecord) -> Result<()> {
        bail!("disk full")
    }
    async fn get_session(&self, _session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(None)
    }
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(Vec::new())
    }
    async fn load_messages(&self, _session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }
    async fn append_messages(&self, _session_id: &str, _messages: &[ChatMessage]) -> Result<()> {
        bail!("disk full")
    }
    async fn replace_messages(&self, _session_id: &str, _messages: &[ChatMessage]) -> Result<()> {
        bail!("disk full")
    }
    async fn delete_session(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

fn hello_script() -> Script {
    events(vec![
        StreamEvent::content("Hi"),
        StreamEvent::content(" there"),
        StreamEvent::Done,
    ])
}

fn visible(controller: &ChatController) -> Vec<(Role, String, MessageStatus)> {
    controller
        .state()
        .messages
        .into_iter()
        .map(|m| (m.role, m.content, m.status))
        .collect()
}

async fn wait_for_content(controller: &ChatController, expected: &str) {
    for _ in 0..200 {
        let done = controller
            .state()
            .messages
            .last()
            .is_some_and(|m| m.content == expected);
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("content {:?} never arrived", expected);
}

#[tokio::test]
async fn test_completed_turn_is_finalized_and_persisted() {
    let transport = ScriptedTransport::new(vec![hello_script()]);
    let store = Arc::new(InMemoryMessageStore::new());
    let controller = ChatController::new(transport.clone(), store.clone());

    let mut deltas = Vec::new();
    let outcome = controller
        .send_message_with("hello", |d| deltas.push(d.to_string()))
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed { persisted: true });
    assert_eq!(deltas, vec!["Hi", " there"]);
    assert_eq!(
        visible(&controller),
        vec![
            (Role::User, "hello".to_string(), MessageStatus::Complete),
            (Role::Assistant, "Hi there".to_string(), MessageStatus::Complete),
        ]
    );
    assert!(!controller.is_generating());

    let state = controller.state();
    let stored = store.load_messages(&state.session_id).await.unwrap();
    assert_eq!(stored, state.messages);
    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "hello");

    let (provider, request) = transport.requests().remove(0);
    assert_eq!(provider, "openai");
    assert_eq!(request.latest_user_content(), Some("hello"));
}

#[tokio::test]
async fn test_error_event_rolls_back_turn() {
    let transport = ScriptedTransport::new(vec![events(vec![
        StreamEvent::content("Hi"),
        StreamEvent::error("rate limited"),
    ])]);
    let store = Arc::new(InMemoryMessageStore::new());
    let controller = ChatController::new(transport, store.clone());

    let err = controller.send_message("hello").await.unwrap_err();
    assert_eq!(err, ChatError::Upstream("rate limited".to_string()));
    assert!(visible(&controller).is_empty());
    assert!(store.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejection_rolls_back_turn() {
    let transport = ScriptedTransport::new(vec![Script::Reject {
        status: 500,
        message: "OpenAI API key not configured",
    }]);
    let controller = ChatController::new(transport, Arc::new(InMemoryMessageStore::new()));

    let err = controller.send_message("hello").await.unwrap_err();
    assert_eq!(
        err,
        ChatError::Rejected("OpenAI API key not configured".to_string())
    );
    assert_eq!(err.to_string(), "OpenAI API key not configured");
    assert!(visible(&controller).is_empty());
}

#[tokio::test]
async fn test_stream_without_terminal_event_fails() {
    let transport = ScriptedTransport::new(vec![events(vec![StreamEvent::content("Hi")])]);
    let controller = ChatController::new(transport, Arc::new(InMemoryMessageStore::new()));

    let err = controller.send_message("hello").await.unwrap_err();
    assert_eq!(err, ChatError::Incomplete);
    assert!(visible(&controller).is_empty());
}

#[tokio::test]
async fn test_stop_keeps_partial_reply_unsaved() {
    let transport = ScriptedTransport::new(vec![Script::Events {
        events: vec![StreamEvent::content("Hi")],
        stall: true,
    }]);
    let store = Arc::new(InMemoryMessageStore::new());
    let controller = ChatController::new(transport, store.clone());

    let stopper = async {
        wait_for_content(&controller, "Hi").await;
        assert!(controller.is_generating());
        assert!(controller.stop());
    };
    let (outcome, ()) = tokio::join!(controller.send_message("hello"), stopper);

    assert_eq!(outcome.unwrap(), TurnOutcome::Stopped);
    assert_eq!(
        visible(&controller),
        vec![
            (Role::User, "hello".to_string(), MessageStatus::Complete),
            (Role::Assistant, "Hi".to_string(), MessageStatus::Stopped),
        ]
    );
    assert!(!controller.is_generating());
    assert!(!controller.stop());
    assert!(store.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_turn_supersedes_running_one() {
    let transport = ScriptedTransport::new(vec![
        Script::Events {
            events: vec![StreamEvent::content("slow")],
            stall: true,
        },
        hello_script(),
    ]);
    let controller = ChatController::new(transport, Arc::new(InMemoryMessageStore::new()));

    let second = async {
        wait_for_content(&controller, "slow").await;
        controller.send_message("again").await
    };
    let (first, second) = tokio::join!(controller.send_message("first"), second);

    assert_eq!(first.unwrap(), TurnOutcome::Stopped);
    assert_eq!(
        second.unwrap(),
        TurnOutcome::Completed { persisted: true }
    );
    let contents: Vec<String> = visible(&controller).into_iter().map(|m| m.1).collect();
    assert_eq!(contents, vec!["first", "slow", "again", "Hi there"]);
}

#[tokio::test]
async fn test_persistence_failure_keeps_conversation() {
    let transport = ScriptedTransport::new(vec![hello_script()]);
    let controller = ChatController::new(transport, Arc::new(FailingStore));

    let outcome = controller.send_message("hello").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed { persisted: false });
    assert_eq!(visible(&controller).len(), 2);
}

#[tokio::test]
async fn test_settings_and_assistant_flow_into_request() {
    let transport = ScriptedTransport::new(vec![hello_script(), hello_script()]);
    let controller = ChatController::new(transport.clone(), Arc::new(InMemoryMessageStore::new()));

    controller.set_settings(ChatSettings {
        provider: "mistral".to_string(),
        model: Some("mistral-small-latest".to_string()),
        temperature: Some(0.1),
        system_prompt: None,
    });
    controller.select_assistant(Some("asst_9".to_string()));
    controller.send_message("one").await.unwrap();
    controller.send_message("two").await.unwrap();

    let requests = transport.requests();
    let (provider, second) = &requests[1];
    assert_eq!(provider, "mistral");
    assert_eq!(second.model.as_deref(), Some("mistral-small-latest"));
    assert_eq!(second.assistant_id.as_deref(), Some("asst_9"));
    assert_eq!(second.messages.len(), 3);

    controller.new_chat();
    let state = controller.state();
    assert!(state.messages.is_empty());
    assert_eq!(state.assistant_id.as_deref(), Some("asst_9"));
    assert_eq!(state.settings.provider, "mistral");
}

#[tokio::test]
async fn test_edit_and_resend_truncates_history_and_store() {
    let transport = ScriptedTransport::new(vec![
        hello_script(),
        hello_script(),
        events(vec![StreamEvent::content("Edited reply"), StreamEvent::Done]),
    ]);
    let store = Arc::new(InMemoryMessageStore::new());
    let controller = ChatController::new(transport.clone(), store.clone());

    controller.send_message("q1").await.unwrap();
    controller.send_message("q2").await.unwrap();

    assert_eq!(
        controller.edit_and_resend(1, "nope").await.unwrap_err(),
        ChatError::NotAUserMessage(1)
    );

    let outcome = controller.edit_and_resend(2, "q2 edited").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed { persisted: true });

    let contents: Vec<String> = visible(&controller).into_iter().map(|m| m.1).collect();
    assert_eq!(contents, vec!["q1", "Hi there", "q2 edited", "Edited reply"]);

    let state = controller.state();
    assert_eq!(
        store.load_messages(&state.session_id).await.unwrap(),
        state.messages
    );
    assert_eq!(transport.requests()[2].1.messages.len(), 3);
}

#[tokio::test]
async fn test_load_session_restores_transcript() {
    let store = Arc::new(InMemoryMessageStore::new());
    let mut record = SessionRecord::titled_from("saved", "earlier");
    record.assistant_id = Some("asst_saved".to_string());
    store.save_session(&record).await.unwrap();
    store
        .append_messages(
            "saved",
            &[ChatMessage::user("earlier"), ChatMessage::assistant("reply")],
        )
        .await
        .unwrap();

    let controller = ChatController::new(ScriptedTransport::new(vec![]), store);
    assert!(!controller.load_session("missing").await.unwrap());
    assert!(controller.load_session("saved").await.unwrap());

    let state = controller.state();
    assert_eq!(state.session_id, "saved");
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.assistant_id.as_deref(), Some("asst_saved"));
}

#[tokio::test]
async fn test_empty_message_is_refused() {
    let transport = ScriptedTransport::new(vec![]);
    let controller = ChatController::new(transport.clone(), Arc::new(InMemoryMessageStore::new()));
    assert_eq!(
        controller.send_message("   ").await.unwrap_err(),
        ChatError::EmptyMessage
    );
    assert!(transport.requests().is_empty());
}
