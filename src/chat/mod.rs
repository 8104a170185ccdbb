//! Chat conversations: routing, reconciliation and the one-shot CLI commands.

pub mod display;
mod key;
pub mod reconcile;
pub mod router;
pub mod session;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time;

use crate::api::{self, client::RemediClient};
use crate::config::Config;
use crate::models::{ChatMessage, CurrentUser};
use crate::realtime::{ConnectionManager, ConnectionState, InboundFrame};

pub use reconcile::LogEntry;
pub use router::ConversationKind;
pub use session::{ChatSession, FetchTicket, FrameOutcome, Outgoing, SendTicket};

/// How long `send` waits for the socket to confirm before giving up.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// One printable line for a message.
pub fn format_message(msg: &ChatMessage, me: &CurrentUser) -> String {
    format!(
        "[{}] {}: {}",
        msg.created_at.format("%Y-%m-%d %H:%M"),
        display::sender_label(msg, me),
        display::display_content(msg)
    )
}

/// One printable line for a pushed frame (used by `listen`).
pub fn describe_frame(frame: &InboundFrame, me: &CurrentUser) -> String {
    match frame {
        InboundFrame::NewMessage { message } => format!("[new] {}", format_message(message, me)),
        InboundFrame::MessageSent { message } => {
            format!("[sent] {}", format_message(message, me))
        }
        InboundFrame::ChatbotResponse {
            user_message,
            bot_message,
        } => format!(
            "[bot] {}\n[bot] {}",
            format_message(user_message, me),
            format_message(bot_message, me)
        ),
        InboundFrame::Typing {
            sender_id,
            sender_name,
        } => format!(
            "[typing] {}",
            sender_name.as_deref().unwrap_or(sender_id.as_str())
        ),
        InboundFrame::Unknown => "[unknown frame]".to_string(),
    }
}

/// Fetch a conversation over HTTP and print it (oldest first).
pub async fn read_conversation(kind: ConversationKind, limit: usize) -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    let me = config.require_user()?;
    let client = RemediClient::from_config(&config)?;

    let mut session = ChatSession::new(me.clone());
    let ticket = session.open(kind.clone());
    let rows = api::chat::list_messages(&client, &kind)
        .await
        .context("Failed to load messages")?;
    session.apply_fetch(&ticket, rows);

    println!("\n{}", kind.title());
    println!("{:-<60}", "");

    let Some(log) = session.active().map(|c| &c.log).filter(|log| !log.is_empty()) else {
        println!("(no messages)");
        return Ok(());
    };

    let skip = log.len().saturating_sub(limit);
    for entry in &log.entries()[skip..] {
        println!("{}", format_message(&entry.message, &me));
    }

    Ok(())
}

/// Send one message, over the socket when possible and HTTP otherwise.
pub async fn send_to_conversation(kind: ConversationKind, content: &str) -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    let token = config.require_token()?;
    let me = config.require_user()?;
    let client = RemediClient::from_config(&config)?;
    let manager = ConnectionManager::from_config(&config)?;

    let mut session = ChatSession::new(me.clone());
    session.open(kind.clone());
    let outgoing = session
        .begin_send(content)
        .context("Refusing to send an empty message")?;

    let (_sub, mut frames) = manager.subscribe_channel();
    let mut state = manager.watch_state();

    let via_socket = match manager.connect(&token).await {
        Ok(()) => manager.send(&outgoing.frame),
        Err(e) if e.is_auth_expired() => {
            anyhow::bail!("Chat server rejected the token. Run `remedi-chat login`.");
        }
        Err(e) => {
            tracing::warn!("Realtime unavailable ({}), sending over HTTP", e);
            false
        }
    };

    if via_socket {
        // Ok(false): the socket dropped first. Err: nothing arrived in time.
        let confirmed = time::timeout(CONFIRM_TIMEOUT, async {
            loop {
                tokio::select! {
                    Some(frame) = frames.recv() => {
                        session.handle_frame(&frame);
                        if !session.is_pending(&outgoing.ticket) {
                            return true;
                        }
                    }
                    changed = state.changed() => {
                        if changed.is_err() || *state.borrow() == ConnectionState::Disconnected {
                            return false;
                        }
                    }
                }
            }
        })
        .await;
        manager.disconnect().await;

        return match confirmed {
            Ok(true) => {
                print_tail(&session, &me);
                Ok(())
            }
            Ok(false) => {
                let draft = session.fail_send(&outgoing.ticket).unwrap_or_default();
                anyhow::bail!(
                    "Connection lost before the server confirmed the message (draft: {:?})",
                    draft
                )
            }
            Err(_) => anyhow::bail!(
                "No confirmation within {}s; the message may not have been delivered",
                CONFIRM_TIMEOUT.as_secs()
            ),
        };
    }

    match api::chat::send_message(&client, &kind, outgoing.content()).await {
        Ok(sent) => {
            session.confirm_send(&outgoing.ticket, sent);
            print_tail(&session, &me);
            Ok(())
        }
        Err(e) if e.is_auth_expired() => {
            anyhow::bail!("Session expired. Run `remedi-chat login`.")
        }
        Err(e) => {
            let draft = session.fail_send(&outgoing.ticket).unwrap_or_default();
            Err(anyhow::Error::new(e).context(format!("Message not sent (draft: {:?})", draft)))
        }
    }
}

/// Print what the send added to the conversation.
fn print_tail(session: &ChatSession, me: &CurrentUser) {
    let Some(conv) = session.active() else {
        return;
    };
    for entry in conv.log.entries().iter().filter(|e| !e.is_pending()) {
        println!("{}", format_message(&entry.message, me));
    }
    println!("Message sent.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn me() -> CurrentUser {
        CurrentUser {
            id: "u1".into(),
            name: None,
            role: Role::User,
        }
    }

    #[test]
    fn test_format_bot_reply() {
        let msg: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": 1, "sender_id": "u1", "content": "[BOT] Yes.",
            "created_at": "2024-02-03T04:05:06Z", "is_bot": true
        }))
        .unwrap();
        assert_eq!(format_message(&msg, &me()), "[2024-02-03 04:05] Assistant: Yes.");
    }

    #[test]
    fn test_describe_typing() {
        let frame = InboundFrame::Typing {
            sender_id: "a2".into(),
            sender_name: Some("Admin Bo".into()),
        };
        assert_eq!(describe_frame(&frame, &me()), "[typing] Admin Bo");
    }
}
