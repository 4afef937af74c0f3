//! Chat session metadata - byte-level API.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const CHAT_SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("chat_sessions");

/// Low-level chat session storage with byte-level API
#[derive(Debug, Clone)]
pub struct ChatSessionStorage {
    db: Arc<Database>,
}

impl ChatSessionStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CHAT_SESSIONS_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store raw session data
    pub fn put_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHAT_SESSIONS_TABLE)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get raw session data by ID
    pub fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAT_SESSIONS_TABLE)?;

        Ok(table.get(id)?.map(|data| data.value().to_vec()))
    }

    /// List all raw session data
    pub fn list_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAT_SESSIONS_TABLE)?;

        let mut sessions = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            sessions.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(sessions)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAT_SESSIONS_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Delete session by ID
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(CHAT_SESSIONS_TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}
