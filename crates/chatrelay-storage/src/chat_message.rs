//! Chat transcript storage - ordered byte entries per session.

use anyhow::{Result, bail};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use std::sync::Arc;

use crate::range_utils::prefix_range;

const CHAT_MESSAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("chat_messages");

fn session_prefix(session_id: &str) -> String {
    format!("{}:", session_id)
}

// Zero-padded so lexicographic order equals sequence order.
fn entry_key(session_id: &str, seq: u64) -> String {
    format!("{}:{:020}", session_id, seq)
}

fn parse_seq(key: &str) -> Option<u64> {
    key.rsplit_once(':').and_then(|(_, seq)| seq.parse().ok())
}

type MessageTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn check_session_id(session_id: &str) -> Result<()> {
    if session_id.contains(':') {
        bail!("session id must not contain ':'");
    }
    Ok(())
}

fn next_seq(table: &MessageTable<'_>, session_id: &str) -> Result<u64> {
    let (start, end) = prefix_range(&session_prefix(session_id));
    match table.range(start.as_str()..end.as_str())?.next_back() {
        Some(item) => {
            let (key, _) = item?;
            Ok(parse_seq(key.value()).map_or(0, |seq| seq + 1))
        }
        None => Ok(0),
    }
}

fn insert_entries(
    table: &mut MessageTable<'_>,
    session_id: &str,
    entries: &[&[u8]],
) -> Result<Vec<u64>> {
    let next = next_seq(table, session_id)?;
    let mut positions = Vec::with_capacity(entries.len());
    for (offset, data) in entries.iter().enumerate() {
        let seq = next + offset as u64;
        table.insert(entry_key(session_id, seq).as_str(), *data)?;
        positions.push(seq);
    }
    Ok(positions)
}

fn remove_from(table: &mut MessageTable<'_>, session_id: &str, keep: u64) -> Result<usize> {
    let start = entry_key(session_id, keep);
    let (_, end) = prefix_range(&session_prefix(session_id));

    let mut doomed = Vec::new();
    for item in table.range(start.as_str()..end.as_str())? {
        let (key, _) = item?;
        doomed.push(key.value().to_string());
    }
    for key in &doomed {
        table.remove(key.as_str())?;
    }
    Ok(doomed.len())
}

/// Append-only transcript log with truncation
#[derive(Debug, Clone)]
pub struct ChatMessageStorage {
    db: Arc<Database>,
}

impl ChatMessageStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CHAT_MESSAGES_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append one entry; returns its zero-based position in the session.
    pub fn append_raw(&self, session_id: &str, data: &[u8]) -> Result<u64> {
        let positions = self.append_many_raw(session_id, &[data])?;
        Ok(positions[0])
    }

    /// Append several entries in a single transaction.
    pub fn append_many_raw(&self, session_id: &str, entries: &[&[u8]]) -> Result<Vec<u64>> {
        check_session_id(session_id)?;

        let write_txn = self.db.begin_write()?;
        let positions = {
            let mut table = write_txn.open_table(CHAT_MESSAGES_TABLE)?;
            insert_entries(&mut table, session_id, entries)?
        };
        write_txn.commit()?;
        Ok(positions)
    }

    /// All entries of a session in append order
    pub fn list_raw(&self, session_id: &str) -> Result<Vec<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHAT_MESSAGES_TABLE)?;
        let (start, end) = prefix_range(&session_prefix(session_id));

        let mut entries = Vec::new();
        for item in table.range(start.as_str()..end.as_str())? {
            let (_, value) = item?;
            entries.push(value.value().to_vec());
        }
        Ok(entries)
    }

    /// Keep the first `keep` entries of a session and drop the rest.
    pub fn truncate(&self, session_id: &str, keep: u64) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CHAT_MESSAGES_TABLE)?;
            remove_from(&mut table, session_id, keep)?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Truncate to `keep` entries and append `entries`, committed together.
    ///
    /// Returns how many entries were removed. Nothing changes on error.
    pub fn replace_tail(&self, session_id: &str, keep: u64, entries: &[&[u8]]) -> Result<usize> {
        check_session_id(session_id)?;

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CHAT_MESSAGES_TABLE)?;
            let removed = remove_from(&mut table, session_id, keep)?;
            insert_entries(&mut table, session_id, entries)?;
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Delete every entry of a session
    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.truncate(session_id, 0)
    }
}
