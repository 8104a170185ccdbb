//! Chat WebSocket connection and frame handling

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::ConnectError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ChatSocket {
    stream: WsStream,
}

impl ChatSocket {
    /// Open the chat socket and present the bearer token.
    ///
    /// The token travels both as a `token` query parameter and as an
    /// `Authorization` header on the upgrade request; servers behind browsers
    /// can only read the former. A completed upgrade is the server's
    /// acknowledgment of the token.
    pub async fn connect(ws_url: &Url, token: &str) -> Result<Self, ConnectError> {
        let mut url = ws_url.clone();
        url.query_pairs_mut().append_pair("token", token);

        tracing::info!("Connecting WebSocket to {}", redact_token(&url));

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(ConnectError::Transport)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ConnectError::Handshake("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = connect_async(request).await.map_err(classify_error)?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<(), tungstenite::Error> {
        tracing::debug!("WS send: {}", msg);
        self.stream.send(Message::Text(msg.to_string())).await
    }

    /// Receive the next text frame, answering pings and skipping binary frames.
    ///
    /// Returns `Ok(None)` once the server closes the socket.
    pub async fn recv_frame(&mut self) -> Result<Option<String>, tungstenite::Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// Send a close frame. Errors are logged, the socket is dropped either way.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}

/// Map an upgrade failure onto the connect error taxonomy.
fn classify_error(e: tungstenite::Error) -> ConnectError {
    match e {
        tungstenite::Error::Http(ref response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            ConnectError::Unauthorized
        }
        tungstenite::Error::Http(response) => {
            ConnectError::Handshake(format!("server answered {}", response.status()))
        }
        other => ConnectError::Transport(other),
    }
}

/// Render a socket URL for logs without leaking the token.
fn redact_token(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_token() {
        let url = Url::parse("ws://localhost:8000/ws/chat/?room=a&token=secret").unwrap();
        let shown = redact_token(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("room=a"));
    }
}
