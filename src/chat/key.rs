//! Content identity of a chat message.

use chrono::{DateTime, Utc};

use crate::models::ChatMessage;

/// Identifies one logical message regardless of which row or id carried it.
///
/// Broadcasts are stored as one row per recipient with distinct ids, so the
/// server id alone cannot detect them. The bot writes under the user's sender
/// id, hence `is_bot` is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub sender_id: String,
    pub is_bot: bool,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ContentKey {
    pub fn of(msg: &ChatMessage) -> Self {
        Self {
            sender_id: msg.sender_id.clone(),
            is_bot: msg.from_bot(),
            content: msg.content.clone(),
            created_at: msg.created_at,
        }
    }
}
