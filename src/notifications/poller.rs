//! Fixed-interval notification polling task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::NotificationSource;
use crate::models::Notification;

/// Messages from the polling task.
#[derive(Debug)]
pub enum PollUpdate {
    /// The full current list.
    Snapshot(Vec<Notification>),
    /// The token was rejected; polling has stopped.
    AuthExpired,
}

/// Handle to the polling task. Dropping it stops polling.
pub struct NotificationPoller {
    handle: JoinHandle<()>,
}

impl NotificationPoller {
    /// Poll `source` now and then every `interval`.
    pub fn spawn(
        source: Arc<dyn NotificationSource>,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PollUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(poll_loop(source, interval, tx));
        (Self { handle }, rx)
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll_loop(
    source: Arc<dyn NotificationSource>,
    interval: Duration,
    tx: mpsc::UnboundedSender<PollUpdate>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match source.fetch_notifications().await {
            Ok(items) => {
                tracing::debug!("Polled {} notifications", items.len());
                if tx.send(PollUpdate::Snapshot(items)).is_err() {
                    break;
                }
            }
            Err(e) if e.is_auth_expired() => {
                tracing::debug!("Notification poll unauthorized, stopping");
                let _ = tx.send(PollUpdate::AuthExpired);
                break;
            }
            Err(e) => {
                tracing::warn!("Notification poll failed: {}", e);
            }
        }
    }
}
