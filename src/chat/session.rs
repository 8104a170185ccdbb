//! The chat view's state: which conversation is open and what it shows.
//!
//! Every asynchronous result (fetch, HTTP send) carries a ticket stamped with
//! the generation that issued it; results from an earlier generation are
//! dropped once the user has switched or closed the conversation.

use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use super::reconcile::{InsertOutcome, MessageLog};
use super::router::{self, ConversationKind};
use crate::models::{ChatMessage, CurrentUser, MessageType, Role, SenderRole, SentMessage};
use crate::realtime::{InboundFrame, OutboundFrame};

/// How long a typing notice stays visible without a refresh.
const TYPING_TTL: Duration = Duration::from_secs(4);

/// Issued by [`ChatSession::open`]; hand it back with the fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    pub kind: ConversationKind,
}

/// Identifies one optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTicket {
    generation: u64,
    pub temp_id: Uuid,
}

/// A composed message ready to go out over the socket or HTTP.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub ticket: SendTicket,
    pub kind: ConversationKind,
    pub frame: OutboundFrame,
}

impl Outgoing {
    pub fn content(&self) -> &str {
        self.frame.content()
    }
}

/// What [`ChatSession::handle_frame`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    NoConversation,
    NotRelevant,
    SelfEcho,
    Duplicate,
    Applied { inserted: usize },
    Typing,
}

#[derive(Debug)]
struct TypingNotice {
    sender_id: String,
    label: String,
    at: Instant,
}

/// An open conversation.
#[derive(Debug)]
pub struct Conversation {
    pub kind: ConversationKind,
    pub log: MessageLog,
    typing: Option<TypingNotice>,
}

impl Conversation {
    fn new(kind: ConversationKind) -> Self {
        Self {
            kind,
            log: MessageLog::new(),
            typing: None,
        }
    }

    fn apply(&mut self, message: ChatMessage) -> bool {
        if self
            .typing
            .as_ref()
            .is_some_and(|t| t.sender_id == message.sender_id)
        {
            self.typing = None;
        }
        self.log.insert(message) != InsertOutcome::Duplicate
    }

    /// Who is typing, if the notice is still fresh.
    pub fn typing(&self, now: Instant) -> Option<&str> {
        self.typing
            .as_ref()
            .filter(|t| now.duration_since(t.at) < TYPING_TTL)
            .map(|t| t.label.as_str())
    }
}

pub struct ChatSession {
    me: CurrentUser,
    active: Option<Conversation>,
    generation: u64,
}

impl ChatSession {
    pub fn new(me: CurrentUser) -> Self {
        Self {
            me,
            active: None,
            generation: 0,
        }
    }

    pub fn me(&self) -> &CurrentUser {
        &self.me
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    /// Switch to `kind` with an empty view. Results issued earlier go stale.
    pub fn open(&mut self, kind: ConversationKind) -> FetchTicket {
        self.generation += 1;
        tracing::debug!("Opening conversation {:?} (generation {})", kind, self.generation);
        self.active = Some(Conversation::new(kind.clone()));
        FetchTicket {
            generation: self.generation,
            kind,
        }
    }

    /// Ticket to re-fetch the open conversation without clearing it.
    pub fn refresh(&self) -> Option<FetchTicket> {
        self.active.as_ref().map(|conv| FetchTicket {
            generation: self.generation,
            kind: conv.kind.clone(),
        })
    }

    /// Whether a fetch issued with `ticket` would still be applied.
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation && self.active.is_some()
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.active = None;
    }

    fn current(&mut self, generation: u64) -> Option<&mut Conversation> {
        if generation != self.generation {
            return None;
        }
        self.active.as_mut()
    }

    /// Apply a fetch result unless the user has moved on. Returns whether it
    /// was applied.
    pub fn apply_fetch(&mut self, ticket: &FetchTicket, rows: Vec<ChatMessage>) -> bool {
        match self.current(ticket.generation) {
            Some(conv) => {
                let added = conv.log.merge_fetched(rows);
                tracing::debug!("Fetched {} new messages for {:?}", added, conv.kind);
                true
            }
            None => {
                tracing::debug!("Discarding stale fetch for {:?}", ticket.kind);
                false
            }
        }
    }

    /// Route, filter and reconcile one pushed frame.
    pub fn handle_frame(&mut self, frame: &InboundFrame) -> FrameOutcome {
        let me = &self.me;
        let Some(conv) = self.active.as_mut() else {
            return FrameOutcome::NoConversation;
        };
        if !router::accepts_frame(&conv.kind, frame, me) {
            return FrameOutcome::NotRelevant;
        }

        let inserted = match frame {
            InboundFrame::NewMessage { message } => {
                // Our own broadcast; the `message_sent` confirmation is canonical.
                if message.sender_id == me.id && !message.from_bot() {
                    return FrameOutcome::SelfEcho;
                }
                usize::from(conv.apply(message.clone()))
            }
            InboundFrame::MessageSent { message } => usize::from(conv.apply(message.clone())),
            InboundFrame::ChatbotResponse {
                user_message,
                bot_message,
            } => {
                let question = conv.apply(user_message.clone());
                let answer = conv.apply(as_bot_reply(bot_message.clone()));
                usize::from(question) + usize::from(answer)
            }
            InboundFrame::Typing {
                sender_id,
                sender_name,
            } => {
                conv.typing = Some(TypingNotice {
                    sender_id: sender_id.clone(),
                    label: sender_name.clone().unwrap_or_else(|| sender_id.clone()),
                    at: Instant::now(),
                });
                return FrameOutcome::Typing;
            }
            InboundFrame::Unknown => return FrameOutcome::NotRelevant,
        };

        if inserted == 0 {
            FrameOutcome::Duplicate
        } else {
            FrameOutcome::Applied { inserted }
        }
    }

    /// Insert `content` as a pending message and build the frame to send.
    ///
    /// Returns `None` for blank input or when no conversation is open.
    pub fn begin_send(&mut self, content: &str) -> Option<Outgoing> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let generation = self.generation;
        let me = self.me.clone();
        let conv = self.active.as_mut()?;

        let temp_id = Uuid::new_v4();
        let recipient_id = match &conv.kind {
            ConversationKind::Direct { counterpart_id } => Some(counterpart_id.clone()),
            ConversationKind::Bot | ConversationKind::AdminPool => None,
        };
        let draft = ChatMessage {
            id: temp_id.to_string(),
            sender_id: me.id.clone(),
            recipient_id: recipient_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender_name: me.name.clone(),
            sender_role: match me.role {
                Role::Admin => SenderRole::Admin,
                Role::User => SenderRole::User,
            },
            message_type: conv.kind.message_type(),
            is_bot: false,
        };
        conv.log.insert_pending(temp_id, draft);

        let frame = match conv.kind {
            ConversationKind::Bot => OutboundFrame::ChatbotMessage {
                content: content.to_string(),
            },
            _ => OutboundFrame::ChatMessage {
                content: content.to_string(),
                recipient_id,
            },
        };

        Some(Outgoing {
            ticket: SendTicket {
                generation,
                temp_id,
            },
            kind: conv.kind.clone(),
            frame,
        })
    }

    /// Whether the optimistic entry for `ticket` is still awaiting the server.
    pub fn is_pending(&self, ticket: &SendTicket) -> bool {
        ticket.generation == self.generation
            && self
                .active
                .as_ref()
                .is_some_and(|conv| conv.log.is_pending(ticket.temp_id))
    }

    /// Replace the pending entry with the server's copy from an HTTP send.
    pub fn confirm_send(&mut self, ticket: &SendTicket, sent: SentMessage) -> bool {
        let Some(conv) = self.current(ticket.generation) else {
            tracing::debug!("Discarding stale send confirmation");
            return false;
        };
        conv.log.remove_pending(ticket.temp_id);
        match sent {
            SentMessage::Single(message) => {
                conv.apply(message);
            }
            SentMessage::Exchange {
                user_message,
                bot_message,
            } => {
                conv.apply(user_message);
                conv.apply(as_bot_reply(bot_message));
            }
        }
        true
    }

    /// Drop the pending entry of a failed send and return the draft text.
    pub fn fail_send(&mut self, ticket: &SendTicket) -> Option<String> {
        let conv = self.current(ticket.generation)?;
        conv.log.remove_pending(ticket.temp_id).map(|m| m.content)
    }
}

/// Bot replies may arrive without the flag set; the channel implies it.
fn as_bot_reply(mut message: ChatMessage) -> ChatMessage {
    message.is_bot = true;
    if message.message_type == MessageType::Other {
        message.message_type = MessageType::Chatbot;
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::reconcile::Delivery;

    const T: &str = "2024-06-01T12:00:00Z";

    fn me() -> CurrentUser {
        CurrentUser {
            id: "u1".into(),
            name: Some("Ana".into()),
            role: Role::User,
        }
    }

    fn admin() -> CurrentUser {
        CurrentUser {
            id: "a1".into(),
            name: None,
            role: Role::Admin,
        }
    }

    fn message(id: &str, sender: &str, content: &str, at: &str) -> ChatMessage {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "sender_id": sender,
            "content": content,
            "created_at": at,
            "message_type": "user_admin",
        }))
        .unwrap()
    }

    fn pushed(kind: &str, msg: ChatMessage) -> InboundFrame {
        serde_json::from_value(serde_json::json!({ "type": kind, "message": msg })).unwrap()
    }

    fn contents(session: &ChatSession) -> Vec<String> {
        session
            .active()
            .unwrap()
            .log
            .entries()
            .iter()
            .map(|e| e.message.content.clone())
            .collect()
    }

    #[test]
    fn test_self_echo_dropped_confirmation_kept() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);

        let echo = pushed("new_message", message("a", "u1", "hi", T));
        assert_eq!(session.handle_frame(&echo), FrameOutcome::SelfEcho);
        assert!(contents(&session).is_empty());

        let sent = pushed("message_sent", message("b", "u1", "hi", T));
        assert_eq!(
            session.handle_frame(&sent),
            FrameOutcome::Applied { inserted: 1 }
        );
        assert_eq!(contents(&session), vec!["hi"]);
    }

    #[test]
    fn test_broadcast_push_from_other_user_once() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);

        let first = pushed("new_message", message("x1", "a7", "hello", T));
        let second = pushed("new_message", message("x2", "a7", "hello", T));
        assert_eq!(
            session.handle_frame(&first),
            FrameOutcome::Applied { inserted: 1 }
        );
        assert_eq!(session.handle_frame(&second), FrameOutcome::Duplicate);
        assert_eq!(contents(&session).len(), 1);
    }

    #[test]
    fn test_irrelevant_frame_ignored() {
        let mut session = ChatSession::new(admin());
        session.open(ConversationKind::Direct {
            counterpart_id: "u7".into(),
        });

        let mut other = message("m", "u9", "elsewhere", T);
        other.recipient_id = Some("a1".into());
        assert_eq!(
            session.handle_frame(&pushed("new_message", other)),
            FrameOutcome::NotRelevant
        );

        let mut theirs = message("n", "u7", "mine to see", T);
        theirs.recipient_id = Some("a1".into());
        assert_eq!(
            session.handle_frame(&pushed("new_message", theirs)),
            FrameOutcome::Applied { inserted: 1 }
        );
    }

    #[test]
    fn test_no_conversation() {
        let mut session = ChatSession::new(me());
        let frame = pushed("message_sent", message("b", "u1", "hi", T));
        assert_eq!(session.handle_frame(&frame), FrameOutcome::NoConversation);
    }

    #[test]
    fn test_stale_fetch_not_applied_after_switch() {
        let mut session = ChatSession::new(me());
        let ticket_a = session.open(ConversationKind::AdminPool);
        let ticket_b = session.open(ConversationKind::Bot);

        let rows_a = vec![message("1", "a2", "for pool", T)];
        assert!(!session.apply_fetch(&ticket_a, rows_a));
        assert!(session.active().unwrap().log.is_empty());
        assert_eq!(session.active().unwrap().kind, ConversationKind::Bot);

        let mut bot_row = message("2", "u1", "for bot", T);
        bot_row.message_type = MessageType::Chatbot;
        assert!(session.apply_fetch(&ticket_b, vec![bot_row]));
        assert_eq!(contents(&session), vec!["for bot"]);
    }

    #[test]
    fn test_fetch_after_close_discarded() {
        let mut session = ChatSession::new(me());
        let ticket = session.open(ConversationKind::AdminPool);
        session.close();
        assert!(!session.apply_fetch(&ticket, vec![message("1", "a2", "x", T)]));
        assert!(session.active().is_none());
    }

    #[test]
    fn test_switching_clears_view() {
        let mut session = ChatSession::new(me());
        let ticket = session.open(ConversationKind::AdminPool);
        session.apply_fetch(&ticket, vec![message("1", "a2", "x", T)]);
        session.open(ConversationKind::AdminPool);
        assert!(session.active().unwrap().log.is_empty());
    }

    #[test]
    fn test_optimistic_send_confirmed_by_push() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);

        let outgoing = session.begin_send("  need a pickup  ").unwrap();
        assert_eq!(outgoing.content(), "need a pickup");
        assert!(session.is_pending(&outgoing.ticket));
        assert_eq!(
            outgoing.frame,
            OutboundFrame::ChatMessage {
                content: "need a pickup".into(),
                recipient_id: None
            }
        );

        let confirmed = pushed(
            "message_sent",
            message("srv-1", "u1", "need a pickup", "2030-01-01T00:00:00Z"),
        );
        assert_eq!(
            session.handle_frame(&confirmed),
            FrameOutcome::Applied { inserted: 1 }
        );
        assert!(!session.is_pending(&outgoing.ticket));

        let entries = session.active().unwrap().log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.id, "srv-1");
        assert_eq!(entries[0].delivery, Delivery::Confirmed);
    }

    #[test]
    fn test_direct_send_targets_counterpart() {
        let mut session = ChatSession::new(admin());
        session.open(ConversationKind::Direct {
            counterpart_id: "u7".into(),
        });
        let outgoing = session.begin_send("your voucher is ready").unwrap();
        assert_eq!(
            outgoing.frame,
            OutboundFrame::ChatMessage {
                content: "your voucher is ready".into(),
                recipient_id: Some("u7".into())
            }
        );
        let pending = &session.active().unwrap().log.entries()[0].message;
        assert_eq!(pending.sender_role, SenderRole::Admin);
        assert_eq!(pending.recipient_id.as_deref(), Some("u7"));
    }

    #[test]
    fn test_blank_or_closed_send_rejected() {
        let mut session = ChatSession::new(me());
        assert!(session.begin_send("hello").is_none());
        session.open(ConversationKind::Bot);
        assert!(session.begin_send("   ").is_none());
    }

    #[test]
    fn test_http_confirm_then_push_is_single_entry() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);
        let outgoing = session.begin_send("hi").unwrap();

        let stored = message("srv-2", "u1", "hi", "2030-01-01T00:00:00Z");
        assert!(session.confirm_send(&outgoing.ticket, SentMessage::Single(stored.clone())));
        session.handle_frame(&pushed("message_sent", stored));

        assert_eq!(contents(&session), vec!["hi"]);
        assert!(!session.is_pending(&outgoing.ticket));
    }

    #[test]
    fn test_failed_send_restores_draft() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);
        let outgoing = session.begin_send("please call me").unwrap();

        assert_eq!(
            session.fail_send(&outgoing.ticket).as_deref(),
            Some("please call me")
        );
        assert!(contents(&session).is_empty());
    }

    #[test]
    fn test_history_fetch_keeps_matching_draft_pending() {
        let mut session = ChatSession::new(me());
        let ticket = session.open(ConversationKind::AdminPool);
        let outgoing = session.begin_send("ok").unwrap();

        let yesterday = message("old-1", "u1", "ok", "2020-01-01T00:00:00Z");
        assert!(session.apply_fetch(&ticket, vec![yesterday]));
        assert!(session.is_pending(&outgoing.ticket));

        assert_eq!(session.fail_send(&outgoing.ticket).as_deref(), Some("ok"));
        assert_eq!(contents(&session), vec!["ok"]);
        assert_eq!(session.active().unwrap().log.entries()[0].message.id, "old-1");
    }

    #[test]
    fn test_fresh_fetch_row_confirms_draft() {
        let mut session = ChatSession::new(me());
        let ticket = session.open(ConversationKind::AdminPool);
        let outgoing = session.begin_send("ok").unwrap();

        let stored = message("srv-7", "u1", "ok", &Utc::now().to_rfc3339());
        session.apply_fetch(&ticket, vec![stored]);
        assert!(!session.is_pending(&outgoing.ticket));
        assert_eq!(contents(&session), vec!["ok"]);
    }

    #[test]
    fn test_confirm_after_switch_is_stale() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);
        let outgoing = session.begin_send("hi").unwrap();
        session.open(ConversationKind::Bot);

        let stored = message("srv-3", "u1", "hi", T);
        assert!(!session.confirm_send(&outgoing.ticket, SentMessage::Single(stored)));
        assert!(session.fail_send(&outgoing.ticket).is_none());
        assert!(session.active().unwrap().log.is_empty());
    }

    #[test]
    fn test_chatbot_exchange_over_socket() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::Bot);
        let outgoing = session.begin_send("Which medicines can I donate?").unwrap();
        assert_eq!(
            outgoing.frame,
            OutboundFrame::ChatbotMessage {
                content: "Which medicines can I donate?".into()
            }
        );

        let response: InboundFrame = serde_json::from_value(serde_json::json!({
            "type": "chatbot_response",
            "user_message": {
                "id": 10, "sender_id": "u1", "content": "Which medicines can I donate?",
                "created_at": "2030-01-01T00:00:00Z", "message_type": "chatbot"
            },
            "bot_message": {
                "id": 11, "sender_id": "u1", "content": "[BOT] Unopened, unexpired ones.",
                "created_at": "2030-01-01T00:00:02Z"
            }
        }))
        .unwrap();
        assert_eq!(
            session.handle_frame(&response),
            FrameOutcome::Applied { inserted: 2 }
        );
        assert!(!session.is_pending(&outgoing.ticket));

        let entries = session.active().unwrap().log.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].message.from_bot());
        assert!(entries[1].message.is_bot);
        assert_eq!(entries[1].message.message_type, MessageType::Chatbot);
    }

    #[test]
    fn test_typing_notice_expires_and_clears() {
        let mut session = ChatSession::new(me());
        session.open(ConversationKind::AdminPool);

        let typing = InboundFrame::Typing {
            sender_id: "a3".into(),
            sender_name: None,
        };
        assert_eq!(session.handle_frame(&typing), FrameOutcome::Typing);
        let now = Instant::now();
        assert_eq!(session.active().unwrap().typing(now), Some("a3"));
        assert_eq!(
            session.active().unwrap().typing(now + Duration::from_secs(10)),
            None
        );

        session.handle_frame(&pushed("new_message", message("m", "a3", "done", T)));
        assert_eq!(session.active().unwrap().typing(Instant::now()), None);
    }
}
