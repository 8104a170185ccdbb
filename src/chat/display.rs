//! Render-time presentation rules.

use crate::models::{ChatMessage, CurrentUser};

/// Marker the bot backend prefixes to its replies.
pub const BOT_TAG: &str = "[BOT]";

/// Whether the message should be drawn as the viewer's own.
///
/// The bot writes under the user's sender id, so the bot flag wins.
pub fn is_mine(msg: &ChatMessage, me: &CurrentUser) -> bool {
    !msg.from_bot() && msg.sender_id == me.id
}

/// Message text with the bot tag removed. Identity keys use the raw content.
pub fn display_content(msg: &ChatMessage) -> &str {
    match msg.content.strip_prefix(BOT_TAG) {
        Some(rest) => rest.trim_start(),
        None => &msg.content,
    }
}

pub fn sender_label<'a>(msg: &'a ChatMessage, me: &CurrentUser) -> &'a str {
    if msg.from_bot() {
        "Assistant"
    } else if msg.sender_id == me.id {
        "You"
    } else {
        msg.sender_name.as_deref().unwrap_or(&msg.sender_id)
    }
}
