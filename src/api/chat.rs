//! Chat endpoints used when the socket is unavailable.

use serde::Deserialize;

use super::client::{ApiError, RemediClient};
use crate::chat::ConversationKind;
use crate::models::{ChatMessage, MessageType, SentMessage};

/// List responses come bare or wrapped in a paginator.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Plain(Vec<T>),
    Paged { results: Vec<T> },
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Plain(items) => items,
            Listing::Paged { results } => results,
        }
    }
}

/// Query parameters selecting a conversation's messages.
fn list_query(kind: &ConversationKind) -> Vec<(&'static str, String)> {
    match kind {
        ConversationKind::Direct { counterpart_id } => vec![("user_id", counterpart_id.clone())],
        ConversationKind::AdminPool => vec![("message_type", MessageType::UserAdmin.as_str().into())],
        ConversationKind::Bot => vec![("message_type", MessageType::Chatbot.as_str().into())],
    }
}

/// Body for the HTTP send fallback.
fn send_body(kind: &ConversationKind, content: &str) -> serde_json::Value {
    match kind {
        ConversationKind::Direct { counterpart_id } => serde_json::json!({
            "content": content,
            "recipient_id": counterpart_id,
            "message_type": kind.message_type().as_str(),
        }),
        ConversationKind::AdminPool | ConversationKind::Bot => serde_json::json!({
            "content": content,
            "message_type": kind.message_type().as_str(),
        }),
    }
}

/// Fetch the stored messages of a conversation (raw, not yet reconciled).
pub async fn list_messages(
    client: &RemediClient,
    kind: &ConversationKind,
) -> Result<Vec<ChatMessage>, ApiError> {
    let listing: Listing<ChatMessage> = client.get_json("chat/messages/", &list_query(kind)).await?;
    Ok(listing.into_vec())
}

/// Send a message over HTTP. The chatbot endpoint answers with both the
/// stored question and the bot's reply.
pub async fn send_message(
    client: &RemediClient,
    kind: &ConversationKind,
    content: &str,
) -> Result<SentMessage, ApiError> {
    let path = match kind {
        ConversationKind::Bot => "chat/chatbot/",
        ConversationKind::Direct { .. } | ConversationKind::AdminPool => "chat/messages/",
    };
    client.post_json(path, &send_body(kind, content)).await
}
