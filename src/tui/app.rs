//! TUI application state and main event loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::{FutureExt, StreamExt};
use ratatui::DefaultTerminal;
use tokio::time;
use tokio_stream::wrappers::WatchStream;

use super::backend::{Backend, BackendCommand, BackendResponse};
use super::compose::ComposeState;
use super::ui;
use crate::api::client::RemediClient;
use crate::chat::{ChatSession, ConversationKind, FetchTicket, FrameOutcome, Outgoing, SendTicket};
use crate::config::Config;
use crate::models::CurrentUser;
use crate::notifications::{NotificationPoller, NotificationState, PollUpdate};
use crate::realtime::{ConnectionManager, ConnectionState, InboundFrame};

/// Redraw interval so typing notices expire on screen.
const TICK: Duration = Duration::from_millis(500);

/// How long a socket send may wait for `message_sent` before the draft is
/// handed back.
const SEND_CONFIRM_TIMEOUT: Duration = Duration::from_secs(15);

/// Lines moved per PageUp/PageDown.
const SCROLL_STEP: usize = 10;

const SESSION_EXPIRED: &str = "Session expired. Quit and run `remedi-chat login`.";

pub const HELP: &str =
    "/admin  /bot  /user <id>  /close  /notifications  /read <id>  /readall  /reconnect  /quit";

/// Commands typed into the compose box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Admin,
    Bot,
    User(String),
    Close,
    Notifications,
    Read(String),
    ReadAll,
    Reconnect,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Command(SlashCommand),
}

/// Classify submitted text. `//text` sends `/text` literally.
pub fn parse_input(text: &str) -> Result<Input, String> {
    let Some(rest) = text.strip_prefix('/') else {
        return Ok(Input::Message(text.to_string()));
    };
    if rest.starts_with('/') {
        return Ok(Input::Message(rest.to_string()));
    }

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(format!("Too many arguments: /{}", rest));
    }

    let cmd = match (name, arg) {
        ("admin", None) => SlashCommand::Admin,
        ("bot", None) => SlashCommand::Bot,
        ("user", Some(id)) => SlashCommand::User(id.to_string()),
        ("user", None) => return Err("Usage: /user <id>".to_string()),
        ("close", None) => SlashCommand::Close,
        ("notifications" | "n", None) => SlashCommand::Notifications,
        ("read", Some(id)) => SlashCommand::Read(id.to_string()),
        ("read", None) => return Err("Usage: /read <id>".to_string()),
        ("readall", None) => SlashCommand::ReadAll,
        ("reconnect", None) => SlashCommand::Reconnect,
        ("help", None) => SlashCommand::Help,
        ("quit" | "q", None) => SlashCommand::Quit,
        _ => return Err(format!("Unknown command: /{}", rest)),
    };
    Ok(Input::Command(cmd))
}

/// Side effects the event loop performs on the app's behalf.
#[derive(Debug)]
pub enum Effect {
    Fetch(FetchTicket),
    Send(Outgoing),
    MarkRead(String),
    MarkAllRead,
    Reconnect,
}

/// Application state
pub struct App {
    pub session: ChatSession,
    pub notifications: NotificationState,
    pub compose: ComposeState,
    pub connection: ConnectionState,
    /// Show the notification list instead of the conversation.
    pub show_notifications: bool,
    /// Lines scrolled up from the newest message.
    pub scroll: usize,
    pub status_message: Option<String>,
    pub status_is_error: bool,
    pub should_exit: bool,
    /// Sends queued on the socket, awaiting the server's confirmation.
    in_flight: Vec<(SendTicket, Instant)>,
}

impl App {
    pub fn new(me: CurrentUser) -> Self {
        Self {
            session: ChatSession::new(me),
            notifications: NotificationState::new(),
            compose: ComposeState::default(),
            connection: ConnectionState::Disconnected,
            show_notifications: false,
            scroll: 0,
            status_message: None,
            status_is_error: false,
            should_exit: false,
            in_flight: Vec::new(),
        }
    }

    fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_is_error = false;
    }

    fn set_error(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_is_error = true;
    }

    pub fn open(&mut self, kind: ConversationKind) -> Effect {
        self.show_notifications = false;
        self.scroll = 0;
        Effect::Fetch(self.session.open(kind))
    }

    /// Handle one key press.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Effect> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.should_exit = true,
            KeyCode::Char('u') if ctrl => self.compose.clear(),
            KeyCode::Enter => return self.submit(),
            KeyCode::Esc => {
                if self.show_notifications {
                    self.show_notifications = false;
                } else {
                    self.status_message = None;
                }
            }
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Delete => self.compose.delete(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            KeyCode::PageUp => self.scroll += SCROLL_STEP,
            KeyCode::PageDown => self.scroll = self.scroll.saturating_sub(SCROLL_STEP),
            KeyCode::Char(c) if !ctrl => self.compose.insert_char(c),
            _ => {}
        }
        None
    }

    fn submit(&mut self) -> Option<Effect> {
        let text = self.compose.take()?;
        self.status_message = None;
        match parse_input(&text) {
            Ok(Input::Message(content)) => self.send(content),
            Ok(Input::Command(cmd)) => self.run_command(cmd),
            Err(e) => {
                self.compose.restore(text);
                self.set_error(e);
                None
            }
        }
    }

    fn send(&mut self, content: String) -> Option<Effect> {
        match self.session.begin_send(&content) {
            Some(outgoing) => {
                self.scroll = 0;
                Some(Effect::Send(outgoing))
            }
            None => {
                self.compose.restore(content);
                self.set_error("Open a conversation first: /admin, /bot or /user <id>");
                None
            }
        }
    }

    fn run_command(&mut self, cmd: SlashCommand) -> Option<Effect> {
        match cmd {
            SlashCommand::Admin => return Some(self.open(ConversationKind::AdminPool)),
            SlashCommand::Bot => return Some(self.open(ConversationKind::Bot)),
            SlashCommand::User(counterpart_id) => {
                return Some(self.open(ConversationKind::Direct { counterpart_id }))
            }
            SlashCommand::Close => self.session.close(),
            SlashCommand::Notifications => self.show_notifications = !self.show_notifications,
            SlashCommand::Read(id) => {
                if self.notifications.mark_read(&id) {
                    return Some(Effect::MarkRead(id));
                }
                self.set_error(format!("No unread notification {}", id));
            }
            SlashCommand::ReadAll => {
                if self.notifications.mark_all_read() > 0 {
                    return Some(Effect::MarkAllRead);
                }
                self.set_status("No unread notifications");
            }
            SlashCommand::Reconnect => return Some(Effect::Reconnect),
            SlashCommand::Help => self.set_status(HELP),
            SlashCommand::Quit => self.should_exit = true,
        }
        None
    }

    pub fn handle_response(&mut self, resp: BackendResponse) -> Option<Effect> {
        match resp {
            BackendResponse::Connected(Ok(())) => {
                self.set_status("Connected");
                // Catch up on anything pushed while the socket was down.
                return self.session.refresh().map(Effect::Fetch);
            }
            BackendResponse::Connected(Err(e)) if e.is_auth_expired() => {
                self.set_error(SESSION_EXPIRED)
            }
            BackendResponse::Connected(Err(e)) => {
                tracing::warn!("Chat socket unavailable: {}", e);
                self.set_error(format!("Realtime unavailable ({}); sending over HTTP", e));
            }
            BackendResponse::Messages { ticket, result } => match result {
                Ok(rows) => {
                    self.session.apply_fetch(&ticket, rows);
                }
                Err(_) if !self.session.is_current(&ticket) => {}
                Err(e) if e.is_auth_expired() => self.set_error(SESSION_EXPIRED),
                Err(e) => {
                    tracing::warn!("Failed to load messages: {}", e);
                    self.set_error(format!("Failed to load messages: {}", e));
                }
            },
            BackendResponse::MessageSent { ticket, result } => match result {
                Ok(sent) => {
                    self.session.confirm_send(&ticket, sent);
                }
                Err(e) => {
                    let Some(draft) = self.session.fail_send(&ticket) else {
                        return None;
                    };
                    self.compose.restore(draft);
                    if e.is_auth_expired() {
                        self.set_error(SESSION_EXPIRED);
                    } else {
                        tracing::warn!("Send failed: {}", e);
                        self.set_error(format!("Message not sent: {}", e));
                    }
                }
            },
            BackendResponse::MarkedRead(Ok(())) => {}
            BackendResponse::MarkedRead(Err(e)) if e.is_auth_expired() => {
                self.set_error(SESSION_EXPIRED)
            }
            BackendResponse::MarkedRead(Err(e)) => {
                tracing::warn!("Failed to mark notification read: {}", e);
                self.set_error(format!("Failed to mark read: {}", e));
            }
        }
        None
    }

    pub fn handle_frame(&mut self, frame: &InboundFrame) {
        let outcome = self.session.handle_frame(frame);
        if let FrameOutcome::Applied { inserted } = outcome {
            tracing::debug!("Applied {} pushed messages", inserted);
        }
    }

    pub fn handle_poll(&mut self, update: PollUpdate) {
        match update {
            PollUpdate::Snapshot(items) => self.notifications.apply_snapshot(items),
            PollUpdate::AuthExpired => self.set_error(SESSION_EXPIRED),
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == ConnectionState::Connected && state == ConnectionState::Disconnected {
            self.set_error("Chat socket disconnected. /reconnect to retry.");
        }
        self.connection = state;
        if state == ConnectionState::Disconnected {
            let lost = std::mem::take(&mut self.in_flight);
            self.fail_sends(lost, "Connection lost before the server confirmed");
        }
    }

    /// Remember a send that went out over the socket.
    pub fn track_socket_send(&mut self, ticket: SendTicket) {
        self.in_flight.push((ticket, Instant::now()));
    }

    /// Forget confirmed sends and give up on those older than the timeout.
    pub fn expire_sends(&mut self, now: Instant) {
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .filter(|(ticket, _)| self.session.is_pending(ticket))
            .partition(|(_, at)| now.duration_since(*at) >= SEND_CONFIRM_TIMEOUT);
        self.in_flight = waiting;
        self.fail_sends(expired, "No confirmation from the server");
    }

    /// Drop still-pending entries and put their text back in the compose box.
    fn fail_sends(&mut self, sends: Vec<(SendTicket, Instant)>, reason: &str) {
        let drafts: Vec<String> = sends
            .iter()
            .filter_map(|(ticket, _)| self.session.fail_send(ticket))
            .collect();
        if drafts.is_empty() {
            return;
        }
        tracing::warn!("{}; {} message(s) not delivered", reason, drafts.len());
        self.compose.restore(drafts.join(" "));
        self.set_error(format!("{}. Message not sent, draft restored.", reason));
    }
}

/// Run the TUI application with panic-safe terminal restore
pub async fn run() -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    let token = config.require_token()?;
    let me = config.require_user()?;
    let client = Arc::new(RemediClient::from_config(&config)?);
    let manager = Arc::new(ConnectionManager::from_config(&config)?);
    let poll_interval = config.notifications.interval();

    let mut terminal = ratatui::init();
    let result = AssertUnwindSafe(run_app(
        &mut terminal,
        me,
        client,
        Arc::clone(&manager),
        token,
        poll_interval,
    ))
    .catch_unwind()
    .await;
    manager.disconnect().await;
    ratatui::restore();

    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    me: CurrentUser,
    client: Arc<RemediClient>,
    manager: Arc<ConnectionManager>,
    token: String,
    poll_interval: Duration,
) -> Result<()> {
    let mut backend = Backend::start(Arc::clone(&client), Arc::clone(&manager), token);
    let (_frames_sub, mut frames) = manager.subscribe_channel();
    let mut states = WatchStream::from_changes(manager.watch_state());
    let (_poller, mut polls) = NotificationPoller::spawn(client, poll_interval);
    let mut events = EventStream::new();
    let mut tick = time::interval(TICK);

    let mut app = App::new(me);
    let first = app.open(ConversationKind::AdminPool);
    perform(first, &mut app, &manager, &backend);
    backend.send(BackendCommand::Connect);

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        let effect = tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => app.handle_key(key),
                Some(Ok(_)) => None,
                Some(Err(e)) => return Err(e).context("Terminal input failed"),
                None => break,
            },
            Some(resp) = backend.recv() => app.handle_response(resp),
            Some(frame) = frames.recv() => {
                app.handle_frame(&frame);
                None
            }
            Some(update) = polls.recv() => {
                app.handle_poll(update);
                None
            }
            Some(state) = states.next() => {
                app.set_connection(state);
                None
            }
            _ = tick.tick() => {
                app.expire_sends(Instant::now());
                None
            }
        };

        if let Some(effect) = effect {
            perform(effect, &mut app, &manager, &backend);
        }
    }

    Ok(())
}

fn perform(effect: Effect, app: &mut App, manager: &ConnectionManager, backend: &Backend) {
    match effect {
        Effect::Fetch(ticket) => backend.send(BackendCommand::LoadMessages { ticket }),
        Effect::Send(outgoing) => {
            if manager.send(&outgoing.frame) {
                app.track_socket_send(outgoing.ticket);
            } else {
                backend.send(BackendCommand::SendMessage { outgoing });
            }
        }
        Effect::MarkRead(id) => backend.send(BackendCommand::MarkRead { id }),
        Effect::MarkAllRead => backend.send(BackendCommand::MarkAllRead),
        Effect::Reconnect => backend.send(BackendCommand::Connect),
    }
}
