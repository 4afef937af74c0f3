//! ChatRelay Client - the consuming side of the stream relay
//!
//! This crate provides:
//! - `consume_event_stream`, an incremental SSE reader with cooperative cancellation
//! - `RelayTransport` and its HTTP implementation
//! - `ChatController`, the chat session orchestrator
//! - `MessageStore` persistence adapters (in-memory and redb)

pub mod consumer;
pub mod error;
mod http_client;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod transport;

pub use consumer::{ConsumeOutcome, consume_event_stream};
pub use error::{ChatError, ClientError};
pub use models::{ChatMessage, ChatSettings, MessageStatus, SessionRecord};
pub use orchestrator::{ChatController, ChatState, TurnOutcome};
pub use store::{InMemoryMessageStore, MessageStore, RedbMessageStore};
pub use transport::{ByteStream, HttpRelayClient, RelayTransport};
pub use tokio_util::sync::CancellationToken;
