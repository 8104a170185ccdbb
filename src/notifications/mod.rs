//! Unread notifications, refreshed by polling.
//!
//! Independent of the chat socket: the poller keeps working while realtime is
//! down. Every poll replaces the whole list.

mod poller;

use anyhow::{Context, Result};
use futures::future::BoxFuture;

use crate::api::{self, client::RemediClient, ApiError};
use crate::config::Config;
use crate::models::Notification;

pub use poller::{NotificationPoller, PollUpdate};

/// Anything that can produce the current notification list.
pub trait NotificationSource: Send + Sync {
    fn fetch_notifications(&self) -> BoxFuture<'_, Result<Vec<Notification>, ApiError>>;
}

/// Local notification state shown by the bell badge.
#[derive(Debug, Default)]
pub struct NotificationState {
    items: Vec<Notification>,
    unread: usize,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Replace everything with a fresh poll result, newest first.
    pub fn apply_snapshot(&mut self, mut items: Vec<Notification>) {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items = items;
        self.recount();
    }

    /// Mark one notification read locally. Returns `false` if it was unknown
    /// or already read (no mutation needed).
    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        };
        self.recount();
        changed
    }

    /// Mark everything read locally. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let changed = self.unread;
        for n in &mut self.items {
            n.is_read = true;
        }
        self.recount();
        changed
    }

    fn recount(&mut self) {
        self.unread = self.items.iter().filter(|n| !n.is_read).count();
    }
}

fn print_notifications(state: &NotificationState) {
    println!("\nNotifications ({} unread):", state.unread());
    println!("{:-<60}", "");
    if state.items().is_empty() {
        println!("  (none)");
        return;
    }
    for n in state.items() {
        let marker = if n.is_read { ' ' } else { '*' };
        let title = n.title.as_deref().unwrap_or("Notification");
        println!(
            "{} [{}] {} ({})",
            marker,
            n.created_at.format("%Y-%m-%d %H:%M"),
            title,
            n.id
        );
        println!("    {}", n.message);
    }
}

/// Print notifications once, or keep polling with `watch`.
pub async fn show(watch: bool) -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    let client = RemediClient::from_config(&config)?;
    let mut state = NotificationState::new();

    if !watch {
        let items = api::notifications::list_notifications(&client)
            .await
            .context("Failed to load notifications")?;
        state.apply_snapshot(items);
        print_notifications(&state);
        return Ok(());
    }

    let (_poller, mut updates) =
        NotificationPoller::spawn(std::sync::Arc::new(client), config.notifications.interval());
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(PollUpdate::Snapshot(items)) => {
                    let before = state.unread();
                    state.apply_snapshot(items);
                    if state.unread() != before {
                        print_notifications(&state);
                    }
                }
                Some(PollUpdate::AuthExpired) | None => {
                    anyhow::bail!("Session expired. Run `remedi-chat login`.");
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, at: &str, is_read: bool) -> Notification {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "message": format!("note {}", id),
            "created_at": at,
            "is_read": is_read,
        }))
        .unwrap()
    }

    #[test]
    fn test_snapshot_sorted_newest_first_and_counted() {
        let mut state = NotificationState::new();
        state.apply_snapshot(vec![
            note("1", "2024-01-01T00:00:00Z", true),
            note("3", "2024-01-03T00:00:00Z", false),
            note("2", "2024-01-02T00:00:00Z", false),
        ]);
        let ids: Vec<&str> = state.items().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
        assert_eq!(state.unread(), 2);
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let mut state = NotificationState::new();
        state.apply_snapshot(vec![note("1", "2024-01-01T00:00:00Z", false)]);
        state.apply_snapshot(vec![note("2", "2024-01-02T00:00:00Z", true)]);
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].id, "2");
        assert_eq!(state.unread(), 0);
    }

    #[test]
    fn test_mark_read_is_immediate() {
        let mut state = NotificationState::new();
        state.apply_snapshot(vec![
            note("1", "2024-01-01T00:00:00Z", false),
            note("2", "2024-01-02T00:00:00Z", false),
        ]);
        assert!(state.mark_read("1"));
        assert_eq!(state.unread(), 1);
        assert!(!state.mark_read("1"));
        assert!(!state.mark_read("missing"));

        assert_eq!(state.mark_all_read(), 1);
        assert_eq!(state.unread(), 0);
        assert!(state.items().iter().all(|n| n.is_read));
    }
}
