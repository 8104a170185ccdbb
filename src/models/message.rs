//! Chat message models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de;

/// Role of the party that wrote a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Admin,
    User,
    Bot,
    #[default]
    #[serde(other)]
    Other,
}

/// Channel discriminator carried on every stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Human conversation between a user and the admin team.
    UserAdmin,
    /// Exchange with the AI chatbot.
    Chatbot,
    #[default]
    #[serde(other)]
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserAdmin => "user_admin",
            MessageType::Chatbot => "chatbot",
            MessageType::Other => "other",
        }
    }
}

/// A single chat message as delivered by the socket or the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "de::string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "de::string_or_number")]
    pub sender_id: String,
    #[serde(
        default,
        deserialize_with = "de::opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient_id: Option<String>,
    pub content: String,
    #[serde(deserialize_with = "de::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_role: SenderRole,
    #[serde(default)]
    pub message_type: MessageType,
    /// The bot writes under the user's sender id; this flag tells them apart.
    #[serde(default)]
    pub is_bot: bool,
}

impl ChatMessage {
    /// Whether the bot authored this message.
    pub fn from_bot(&self) -> bool {
        self.is_bot || self.sender_role == SenderRole::Bot
    }
}

/// Result of an HTTP send: a plain message, or a chatbot question/answer pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SentMessage {
    Exchange {
        user_message: ChatMessage,
        bot_message: ChatMessage,
    },
    Single(ChatMessage),
}
