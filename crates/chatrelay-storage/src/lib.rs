//! ChatRelay Storage - byte-level persistence for chat transcripts
//!
//! Uses redb as the embedded database. Callers own serialization; this crate
//! only stores bytes under string keys.
//!
//! # Tables
//!
//! - `chat_sessions` - session metadata, keyed by session id
//! - `chat_messages` - transcript entries, keyed by `{session_id}:{seq}`

pub mod chat_message;
pub mod chat_session;
mod range_utils;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use chat_message::ChatMessageStorage;
pub use chat_session::ChatSessionStorage;

/// Opens the database and initializes every table
pub struct Storage {
    db: Arc<Database>,
    pub chat_sessions: ChatSessionStorage,
    pub chat_messages: ChatMessageStorage,
}

impl Storage {
    /// Create or open storage at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Arc::new(Database::create(path)?);
        tracing::debug!(path = %path.display(), "Opened chat storage");

        Ok(Self {
            chat_sessions: ChatSessionStorage::new(db.clone())?,
            chat_messages: ChatMessageStorage::new(db.clone())?,
            db,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
