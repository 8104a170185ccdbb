//! Per-conversation message log.
//!
//! Merges rows from bulk HTTP fetches and single socket pushes into one
//! deduplicated list ordered by `created_at`. Locally composed messages sit in
//! the log as [`Delivery::Pending`] until the server's copy replaces them.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use uuid::Uuid;

use super::key::ContentKey;
use crate::models::ChatMessage;

/// How far a server timestamp may trail the local clock and still confirm a
/// draft composed at that local time.
const CONFIRM_SKEW_SECS: i64 = 120;

/// Delivery state of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Composed locally, not yet acknowledged. `message.id` is the temp id.
    Pending { temp_id: Uuid },
    /// Stored by the server under `message.id`.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: ChatMessage,
    pub delivery: Delivery,
}

impl LogEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }
}

/// What [`MessageLog::insert`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Replaced the pending entry with this temp id.
    Confirmed(Uuid),
    Duplicate,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    /// Confirmed entries only, key -> server id.
    by_key: HashMap<ContentKey, String>,
    ids: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a bulk fetch. Returns how many messages were new.
    pub fn merge_fetched(&mut self, rows: Vec<ChatMessage>) -> usize {
        collapse_rows(rows)
            .into_iter()
            .filter(|msg| self.insert(msg.clone()) != InsertOutcome::Duplicate)
            .count()
    }

    /// Insert one confirmed message at its sorted position.
    pub fn insert(&mut self, message: ChatMessage) -> InsertOutcome {
        if self.ids.contains(&message.id) {
            return InsertOutcome::Duplicate;
        }
        let key = ContentKey::of(&message);
        if self.by_key.contains_key(&key) {
            return InsertOutcome::Duplicate;
        }

        let outcome = match self.take_matching_pending(&message) {
            Some(temp_id) => InsertOutcome::Confirmed(temp_id),
            None => InsertOutcome::Inserted,
        };

        self.ids.insert(message.id.clone());
        self.by_key.insert(key, message.id.clone());
        self.place(LogEntry {
            message,
            delivery: Delivery::Confirmed,
        });
        outcome
    }

    /// Add a locally composed message awaiting confirmation.
    pub fn insert_pending(&mut self, temp_id: Uuid, message: ChatMessage) {
        self.place(LogEntry {
            message,
            delivery: Delivery::Pending { temp_id },
        });
    }

    /// Drop a pending entry, returning its message.
    pub fn remove_pending(&mut self, temp_id: Uuid) -> Option<ChatMessage> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.delivery == Delivery::Pending { temp_id })?;
        Some(self.entries.remove(pos).message)
    }

    pub fn is_pending(&self, temp_id: Uuid) -> bool {
        self.entries
            .iter()
            .any(|e| e.delivery == Delivery::Pending { temp_id })
    }

    /// Remove the oldest pending entry this server message confirms.
    ///
    /// The server stamps its own `created_at`, so correlation uses sender and
    /// content. A row stamped well before the draft was composed is history,
    /// not a confirmation. Bot replies never confirm a user's draft.
    fn take_matching_pending(&mut self, message: &ChatMessage) -> Option<Uuid> {
        if message.from_bot() {
            return None;
        }
        let skew = Duration::seconds(CONFIRM_SKEW_SECS);
        let pos = self.entries.iter().position(|e| {
            e.is_pending()
                && e.message.sender_id == message.sender_id
                && e.message.content == message.content
                && message.created_at >= e.message.created_at - skew
        })?;
        match self.entries.remove(pos).delivery {
            Delivery::Pending { temp_id } => Some(temp_id),
            Delivery::Confirmed => None,
        }
    }

    /// Insert after every entry with an earlier or equal timestamp.
    fn place(&mut self, entry: LogEntry) {
        let at = self
            .entries
            .partition_point(|e| e.message.created_at <= entry.message.created_at);
        self.entries.insert(at, entry);
    }
}

/// Collapse a raw fetch: first by server id, then by content key.
///
/// The server writes one row per recipient for broadcast messages, so both
/// passes are needed. The first occurrence wins and input order is kept.
pub fn collapse_rows(rows: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut seen_ids = HashSet::new();
    let by_id: Vec<ChatMessage> = rows
        .into_iter()
        .filter(|row| seen_ids.insert(row.id.clone()))
        .collect();

    let mut seen_keys = HashSet::new();
    by_id
        .into_iter()
        .filter(|row| seen_keys.insert(ContentKey::of(row)))
        .collect()
}
