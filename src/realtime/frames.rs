//! Wire frames exchanged over the chat socket.
//!
//! Both directions use internally-tagged JSON (`{"type": "new_message", ...}`).

use serde::{Deserialize, Serialize};

use crate::models::{de, ChatMessage};

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Broadcast delivery of a stored message to every interested party.
    NewMessage { message: ChatMessage },

    /// Confirmation to the sender that its message was stored.
    MessageSent { message: ChatMessage },

    /// The stored user question and the bot's reply.
    ChatbotResponse {
        user_message: ChatMessage,
        bot_message: ChatMessage,
    },

    /// Someone is typing. Ephemeral, never stored.
    Typing {
        #[serde(deserialize_with = "de::string_or_number")]
        sender_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a text frame. Returns `None` for malformed JSON.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!("Dropping unparseable frame ({}): {}", e, text);
                None
            }
        }
    }
}

/// Frames sent by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    ChatMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
    },
    ChatbotMessage {
        content: String,
    },
}

impl OutboundFrame {
    pub fn content(&self) -> &str {
        match self {
            OutboundFrame::ChatMessage { content, .. } => content,
            OutboundFrame::ChatbotMessage { content } => content,
        }
    }
}
