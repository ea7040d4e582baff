//! Push transport seam and its WebSocket implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens authenticated push connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `url` presenting `token` as a bearer credential.
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Connection>>;
}

/// One open push connection carrying text frames.
#[async_trait]
pub trait Connection: Send {
    /// Next text message; `None` when the server closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn send(&mut self, text: String) -> Result<()>;

    async fn close(&mut self);
}

/// `tokio-tungstenite` client.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Normalize a realtime URL to a `ws(s)` scheme.
pub fn websocket_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|error| Error::Config(format!("invalid realtime URL: {error}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(Error::Config(format!(
                "unsupported realtime URL scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Config("failed to set realtime URL scheme".to_string()))?;
    Ok(url)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn Connection>> {
        let url = websocket_url(url)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|error| Error::Transport(error.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::Transport("access token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        tracing::debug!("Connecting realtime channel to {}", url);
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| Error::Transport("realtime connect timed out".to_string()))?
            .map_err(|error| Error::Transport(error.to_string()))?;

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Ping(data)) => {
                    if let Err(error) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(Error::Transport(error.to_string())));
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!("Realtime server sent close frame");
                    return None;
                }
                Ok(_) => {}
                Err(error) => return Some(Err(Error::Transport(error.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| Error::Transport(error.to_string()))
    }

    async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            tracing::debug!("Realtime close handshake failed: {}", error);
        }
    }
}
