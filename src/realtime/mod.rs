//! Realtime chat connection
//!
//! One [`ConnectionManager`] owns the single socket to the chat server and
//! fans inbound frames out to every registered listener. It is built once at
//! the application root and shared behind an `Arc`.

pub mod frames;
pub mod socket;

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

use crate::chat::{self, ConversationKind};
use crate::config::Config;

pub use frames::{InboundFrame, OutboundFrame};
use socket::ChatSocket;

/// Connection lifecycle as seen by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Reasons `connect` can fail. All of them mean "realtime unavailable".
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("chat server rejected the token")]
    Unauthorized,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("invalid socket URL {0}")]
    InvalidUrl(String),
}

impl ConnectError {
    /// Expired or rejected credentials; handled by re-login, not retries.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ConnectError::Unauthorized)
    }
}

type Callback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Registration handle returned by [`ConnectionManager::on_message`].
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes exactly the
/// callback it was created for.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut guard) = listeners.lock() {
                guard.entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// Shared owner of the chat socket.
pub struct ConnectionManager {
    ws_url: Url,
    connect_timeout: Option<Duration>,
    state: Arc<watch::Sender<ConnectionState>>,
    listeners: Arc<Mutex<Listeners>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Link task; the lock also serializes connect/disconnect.
    link: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(ws_url: &str, connect_timeout: Option<Duration>) -> Result<Self, ConnectError> {
        let ws_url = Url::parse(ws_url).map_err(|_| ConnectError::InvalidUrl(ws_url.into()))?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            ws_url,
            connect_timeout,
            state: Arc::new(state),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            outbound: Mutex::new(None),
            link: tokio::sync::Mutex::new(None),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.server.ws_url, config.realtime.connect_timeout())
            .context("Invalid [server] ws_url in config")
    }

    /// Connect and authenticate. Returns immediately if already connected.
    pub async fn connect(&self, token: &str) -> Result<(), ConnectError> {
        let mut link = self.link.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        // Tear down the previous link before opening a new socket.
        if let Some(old) = link.take() {
            self.drop_outbound();
            old.abort();
            let _ = old.await;
        }

        self.state.send_replace(ConnectionState::Connecting);

        let opened = match self.connect_timeout {
            Some(limit) => match time::timeout(limit, ChatSocket::connect(&self.ws_url, token)).await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout(limit)),
            },
            None => ChatSocket::connect(&self.ws_url, token).await,
        };

        let socket = match opened {
            Ok(socket) => socket,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                if e.is_auth_expired() {
                    tracing::debug!("Chat socket rejected token");
                } else {
                    tracing::warn!("Chat socket unavailable: {}", e);
                }
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = Some(tx);
        }
        self.state.send_replace(ConnectionState::Connected);
        *link = Some(tokio::spawn(run_link(
            socket,
            rx,
            Arc::clone(&self.listeners),
            Arc::clone(&self.state),
        )));

        Ok(())
    }

    /// Close the socket. Listeners stay registered for the next connect.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.drop_outbound();
        if let Some(handle) = link.take() {
            tracing::info!("Disconnecting chat socket");
            let _ = handle.await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Register a callback for every parsed inbound frame.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        let mut guard = match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = guard.next_id;
        guard.next_id += 1;
        guard.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Register a listener that forwards frames into a channel.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.on_message(move |frame| {
            let _ = tx.send(frame.clone());
        });
        (sub, rx)
    }

    /// Queue a frame on the socket. Returns `false` when not connected.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        if !self.is_connected() {
            tracing::debug!("Not connected, dropping outbound frame");
            return false;
        }
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to encode outbound frame: {}", e);
                return false;
            }
        };
        let outbound = match self.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match outbound.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions (for a connected/disconnected indicator).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn drop_outbound(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.entries.len()).unwrap_or(0)
    }
}

/// Own the socket until either side closes it.
async fn run_link(
    mut socket: ChatSocket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    listeners: Arc<Mutex<Listeners>>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    loop {
        tokio::select! {
            frame = socket.recv_frame() => {
                match frame {
                    Ok(Some(text)) => dispatch(&listeners, &text),
                    Ok(None) => {
                        tracing::warn!("Chat socket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Chat socket receive error: {}", e);
                        break;
                    }
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = socket.send_text(&text).await {
                            tracing::warn!("Chat socket send failed: {}", e);
                            break;
                        }
                    }
                    None => {
                        socket.close().await;
                        break;
                    }
                }
            }
        }
    }
    state.send_replace(ConnectionState::Disconnected);
}

/// Deliver one frame to every listener, in registration order.
fn dispatch(listeners: &Mutex<Listeners>, text: &str) {
    let frame = match InboundFrame::parse(text) {
        Some(InboundFrame::Unknown) => {
            tracing::debug!("Ignoring frame of unknown type: {}", text);
            return;
        }
        Some(frame) => frame,
        None => return,
    };

    // Snapshot so callbacks may (un)subscribe without deadlocking.
    let callbacks: Vec<Callback> = match listeners.lock() {
        Ok(guard) => guard.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
        Err(poisoned) => poisoned
            .into_inner()
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect(),
    };
    for callback in callbacks {
        callback(&frame);
    }
}

/// Bounded exponential backoff for caller-driven reconnects.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// A session that lasted this long resets the backoff.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(64),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// Print every frame relevant to `kind` (or all frames) until Ctrl+C.
///
/// With `[realtime] reconnect = true` the socket is re-opened with
/// exponential backoff (1s, 2s, 4s, ... capped at 64s); otherwise the
/// command exits when the connection drops.
pub async fn listen(kind: Option<ConversationKind>) -> Result<()> {
    let config = Config::load().context("Failed to load config")?;
    let token = config.require_token()?;
    let me = config.require_user()?;

    let manager = ConnectionManager::from_config(&config)?;
    let policy = ReconnectPolicy::default();
    let reconnect = config.realtime.reconnect;

    let (_sub, mut frames) = manager.subscribe_channel();
    let mut state_rx = manager.watch_state();
    let mut backoff = policy.initial;

    loop {
        match manager.connect(&token).await {
            Ok(()) => {}
            Err(e) if e.is_auth_expired() => {
                anyhow::bail!("Chat server rejected the token. Run `remedi-chat login`.");
            }
            Err(e) if reconnect => {
                tracing::warn!("Connect failed: {}. Retrying in {}s...", e, backoff.as_secs());
                tokio::select! {
                    _ = time::sleep(backoff) => {}
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
                backoff = policy.next_delay(backoff);
                continue;
            }
            Err(e) => return Err(e).context("Chat socket unavailable"),
        }

        let connected_at = Instant::now();
        println!("Connected. Listening for messages... (Ctrl-C to stop)");

        loop {
            tokio::select! {
                Some(frame) = frames.recv() => {
                    let relevant = kind
                        .as_ref()
                        .map_or(true, |k| chat::router::accepts_frame(k, &frame, &me));
                    if relevant {
                        println!("{}", chat::describe_frame(&frame, &me));
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow() == ConnectionState::Disconnected {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("Shutting down...");
                    manager.disconnect().await;
                    return Ok(());
                }
            }
        }

        if !reconnect {
            anyhow::bail!("Chat socket closed");
        }

        if connected_at.elapsed() >= policy.stable_after {
            backoff = policy.initial;
        }
        tracing::warn!("Chat socket dropped. Reconnecting in {}s...", backoff.as_secs());
        tokio::select! {
            _ = time::sleep(backoff) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        backoff = policy.next_delay(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_test::{assert_err, assert_ok};

    const NEW_MESSAGE: &str = r#"{"type":"new_message","message":{"id":"m1","sender_id":"u2","content":"hello","created_at":"2024-01-01T00:00:00Z"}}"#;
    const TYPING: &str = r#"{"type":"typing","sender_id":"u2"}"#;

    /// Accept one client, push `frames`, then echo whatever it sends back
    /// onto `seen`.
    async fn spawn_server(
        frames: Vec<&'static str>,
        seen: mpsc::UnboundedSender<String>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let header_seen = seen.clone();
            let callback = move |req: &Request, resp: Response| {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let _ = header_seen.send(format!("auth:{}", auth));
                Ok::<Response, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => {
                        let _ = seen.send(text);
                    }
                    Message::Close(_) => {
                        let _ = seen.send("closed".to_string());
                        break;
                    }
                    _ => {}
                }
            }
        });
        format!("ws://{}/ws/chat/", addr)
    }

    async fn spawn_rejecting_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |_req: &Request, _resp: Response| {
                let mut err = ErrorResponse::new(Some("bad token".to_string()));
                *err.status_mut() = StatusCode::UNAUTHORIZED;
                Err::<Response, ErrorResponse>(err)
            };
            let _ = tokio_tungstenite::accept_hdr_async(tcp, callback).await;
        });
        format!("ws://{}/ws/chat/", addr)
    }

    async fn wait_for_state(manager: &ConnectionManager, want: ConnectionState) {
        let mut rx = manager.watch_state();
        time::timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() != want {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_connect_presents_token_and_fans_out_in_order() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let url = spawn_server(vec![NEW_MESSAGE, TYPING], seen_tx).await;
        let manager = ConnectionManager::new(&url, None).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let _a = manager.on_message(move |frame| {
            first.lock().unwrap().push(("a", frame.clone()));
        });
        let (_b, mut rx) = manager.subscribe_channel();

        assert_ok!(manager.connect("tok-1").await);
        assert!(manager.is_connected());
        assert_eq!(seen_rx.recv().await.unwrap(), "auth:Bearer tok-1");

        let one = rx.recv().await.unwrap();
        let two = rx.recv().await.unwrap();
        assert!(matches!(one, InboundFrame::NewMessage { .. }));
        assert!(matches!(two, InboundFrame::Typing { .. }));

        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].1, one);
        assert_eq!(recorded[1].1, two);

        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let url = spawn_server(vec![], seen_tx).await;
        let manager = ConnectionManager::new(&url, None).unwrap();

        assert_ok!(manager.connect("tok").await);
        // The server only accepts one client; a second handshake would hang.
        assert_ok!(manager.connect("tok").await);
        assert_eq!(seen_rx.recv().await.unwrap(), "auth:Bearer tok");

        manager.disconnect().await;
        assert_eq!(seen_rx.recv().await.unwrap(), "closed");
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_unauthorized() {
        let url = spawn_rejecting_server().await;
        let manager = ConnectionManager::new(&url, None).unwrap();

        let err = assert_err!(manager.connect("expired").await);
        assert!(err.is_auth_expired());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let manager = ConnectionManager::new(&format!("ws://{}/ws/chat/", addr), None).unwrap();
        let err = assert_err!(manager.connect("tok").await);
        assert!(matches!(err, ConnectError::Transport(_)));
        assert!(!err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(30)).await;
        });

        let manager = ConnectionManager::new(
            &format!("ws://{}/ws/chat/", addr),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        let err = assert_err!(manager.connect("tok").await);
        assert!(matches!(err, ConnectError::Timeout(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_reaches_server() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let url = spawn_server(vec![], seen_tx).await;
        let manager = ConnectionManager::new(&url, None).unwrap();

        let frame = OutboundFrame::ChatMessage {
            content: "hi".into(),
            recipient_id: Some("u7".into()),
        };
        assert!(!manager.send(&frame), "send before connect must fail");

        manager.connect("tok").await.unwrap();
        let _auth = seen_rx.recv().await.unwrap();
        assert!(manager.send(&frame));

        let wire: serde_json::Value =
            serde_json::from_str(&seen_rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({"type": "chat_message", "content": "hi", "recipient_id": "u7"})
        );

        manager.disconnect().await;
        assert!(!manager.send(&frame));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_only_that_listener() {
        let manager = ConnectionManager::new("ws://127.0.0.1:9/ws/", None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let keep = manager.on_message(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        let gone = manager.on_message(move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(manager.listener_count(), 2);

        gone.unsubscribe();
        assert_eq!(manager.listener_count(), 1);

        dispatch(&manager.listeners, TYPING);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(keep);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames_not_delivered() {
        let manager = ConnectionManager::new("ws://127.0.0.1:9/ws/", None).unwrap();
        let (_sub, mut rx) = manager.subscribe_channel();

        dispatch(&manager.listeners, r#"{"type":"presence"}"#);
        dispatch(&manager.listeners, "{{{");
        dispatch(&manager.listeners, TYPING);

        assert!(matches!(rx.recv().await, Some(InboundFrame::Typing { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let manager = ConnectionManager::new("ws://127.0.0.1:9/ws/", None).unwrap();
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_close_marks_disconnected_and_keeps_listeners() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let manager = ConnectionManager::new(&format!("ws://{}/ws/chat/", addr), None).unwrap();
        let (_sub, _rx) = manager.subscribe_channel();
        manager.connect("tok").await.unwrap();

        wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert!(!manager.is_connected());
        assert_eq!(manager.listener_count(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.initial;
        let mut seen = Vec::new();
        for _ in 0..9 {
            seen.push(delay.as_secs());
            delay = policy.next_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ConnectionManager::new("not a url", None),
            Err(ConnectError::InvalidUrl(_))
        ));
    }
}
