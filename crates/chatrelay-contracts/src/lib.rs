//! ChatRelay Contracts - wire types shared by the relay server and its clients.
//!
//! This crate provides:
//! - The chat request payload accepted by the relay routes
//! - The tagged `StreamEvent` carried inside each SSE frame
//! - An incremental SSE decoder that tolerates frames split across reads

pub mod sse;
pub mod wire;

pub use sse::{SseDecoder, SseFrame, Utf8ChunkDecoder, encode_data_frame, parse_event_frame};
pub use wire::{ChatRequest, ChatTurn, ErrorBody, Role, StreamEvent};
