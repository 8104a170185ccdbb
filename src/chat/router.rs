//! Relevance of inbound frames to the open conversation.

use crate::models::{ChatMessage, CurrentUser, MessageType};
use crate::realtime::InboundFrame;

/// The logical channel a chat view is showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    /// The signed-in user's channel to the AI chatbot.
    Bot,
    /// Chat with one specific user (admin view) or admin (user view).
    Direct { counterpart_id: String },
    /// A regular user's single channel to the whole admin team.
    AdminPool,
}

impl ConversationKind {
    pub fn title(&self) -> String {
        match self {
            ConversationKind::Bot => "Remedi assistant".to_string(),
            ConversationKind::Direct { counterpart_id } => format!("user {}", counterpart_id),
            ConversationKind::AdminPool => "Admin team".to_string(),
        }
    }

    /// Channel discriminator stamped on messages composed in this conversation.
    pub fn message_type(&self) -> MessageType {
        match self {
            ConversationKind::Bot => MessageType::Chatbot,
            ConversationKind::Direct { .. } | ConversationKind::AdminPool => MessageType::UserAdmin,
        }
    }
}

/// Whether a stored message belongs to `kind`.
pub fn accepts_message(kind: &ConversationKind, msg: &ChatMessage) -> bool {
    match kind {
        ConversationKind::Bot => msg.message_type == MessageType::Chatbot,
        ConversationKind::Direct { counterpart_id } => {
            msg.sender_id == *counterpart_id
                || msg.recipient_id.as_deref() == Some(counterpart_id.as_str())
        }
        ConversationKind::AdminPool => msg.message_type == MessageType::UserAdmin,
    }
}

/// Whether an inbound frame belongs to `kind`.
pub fn accepts_frame(kind: &ConversationKind, frame: &InboundFrame, me: &CurrentUser) -> bool {
    match frame {
        InboundFrame::NewMessage { message } | InboundFrame::MessageSent { message } => {
            accepts_message(kind, message)
        }
        InboundFrame::ChatbotResponse { .. } => *kind == ConversationKind::Bot,
        InboundFrame::Typing { sender_id, .. } => match kind {
            ConversationKind::Bot => false,
            ConversationKind::Direct { counterpart_id } => sender_id == counterpart_id,
            ConversationKind::AdminPool => *sender_id != me.id,
        },
        InboundFrame::Unknown => false,
    }
}
