//! Async backend: runs network calls off the UI loop.
//!
//! Uses an mpsc channel pair. The TUI sends `BackendCommand` values, and a
//! background tokio task executes them and sends `BackendResponse` values back.
//! Every response carries the ticket of its command so the UI can drop
//! results that arrive after the user switched conversations.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::{self, client::RemediClient, ApiError};
use crate::chat::{FetchTicket, Outgoing, SendTicket};
use crate::models::{ChatMessage, SentMessage};
use crate::realtime::{ConnectError, ConnectionManager};

/// Commands sent from the TUI event loop to the async backend.
pub enum BackendCommand {
    Connect,
    LoadMessages { ticket: FetchTicket },
    /// HTTP fallback for a send the socket could not take.
    SendMessage { outgoing: Outgoing },
    MarkRead { id: String },
    MarkAllRead,
}

/// Responses from the async backend to the TUI.
pub enum BackendResponse {
    Connected(Result<(), ConnectError>),
    Messages {
        ticket: FetchTicket,
        result: Result<Vec<ChatMessage>, ApiError>,
    },
    MessageSent {
        ticket: SendTicket,
        result: Result<SentMessage, ApiError>,
    },
    MarkedRead(Result<(), ApiError>),
}

/// Handle for interacting with the backend from the TUI side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    resp_rx: mpsc::UnboundedReceiver<BackendResponse>,
}

impl Backend {
    /// Start the backend. Spawns a tokio task that processes commands.
    pub fn start(client: Arc<RemediClient>, manager: Arc<ConnectionManager>, token: String) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        tokio::spawn(backend_loop(client, manager, token, cmd_rx, resp_tx));

        Self { cmd_tx, resp_rx }
    }

    /// Send a command to the backend (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Receive a response from the backend.
    ///
    /// Returns `None` only when the backend channel is permanently closed.
    /// Designed to be used inside `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendResponse> {
        self.resp_rx.recv().await
    }
}

/// Background loop that processes commands, one task per command.
async fn backend_loop(
    client: Arc<RemediClient>,
    manager: Arc<ConnectionManager>,
    token: String,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
) {
    let token: Arc<str> = token.into();

    while let Some(cmd) = cmd_rx.recv().await {
        let client = Arc::clone(&client);
        let manager = Arc::clone(&manager);
        let token = Arc::clone(&token);
        let resp_tx = resp_tx.clone();

        tokio::spawn(async move {
            let resp = match cmd {
                BackendCommand::Connect => {
                    BackendResponse::Connected(manager.connect(&token).await)
                }
                BackendCommand::LoadMessages { ticket } => {
                    let result = api::chat::list_messages(&client, &ticket.kind).await;
                    BackendResponse::Messages { ticket, result }
                }
                BackendCommand::SendMessage { outgoing } => {
                    let result =
                        api::chat::send_message(&client, &outgoing.kind, outgoing.content()).await;
                    BackendResponse::MessageSent {
                        ticket: outgoing.ticket,
                        result,
                    }
                }
                BackendCommand::MarkRead { id } => {
                    BackendResponse::MarkedRead(api::notifications::mark_read(&client, &id).await)
                }
                BackendCommand::MarkAllRead => {
                    BackendResponse::MarkedRead(api::notifications::mark_all_read(&client).await)
                }
            };
            let _ = resp_tx.send(resp);
        });
    }
}
