//! Live chat channel over a WebSocket.

use async_trait::async_trait;
use backend_core::ChatPayload;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum LiveChannelError {
    #[error("live channel is not connected")]
    NotConnected,
    #[error("websocket failure: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Who is talking to whom on the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub my_uid: String,
    pub other_uid: String,
}

/// Duplex message feed used only while a chat session is open.
#[async_trait]
pub trait LiveChannel: Send {
    async fn connect(&mut self, session: &LiveSession) -> Result<(), LiveChannelError>;

    async fn send(&mut self, text: &str) -> Result<(), LiveChannelError>;

    /// Next inbound message, or `None` once the channel closed.
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> Option<ChatPayload>;

    async fn disconnect(&mut self);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Frame {
    #[serde(rename = "changeSocketId")]
    ChangeSocketId { uid: String },
    #[serde(rename = "chat")]
    Inbound(ChatPayload),
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    chat: &'a str,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `tokio-tungstenite` implementation of [`LiveChannel`].
pub struct WsLiveChannel {
    url: Url,
    socket: Option<Socket>,
}

impl WsLiveChannel {
    pub fn new(url: Url) -> Self {
        Self { url, socket: None }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

#[async_trait]
impl LiveChannel for WsLiveChannel {
    async fn connect(&mut self, session: &LiveSession) -> Result<(), LiveChannelError> {
        self.disconnect().await;

        let (mut socket, _) = connect_async(self.url.as_str()).await?;
        let hello = serde_json::to_string(&Frame::ChangeSocketId {
            uid: session.my_uid.clone(),
        })?;
        socket.send(Message::Text(hello)).await?;
        debug!(url = %self.url, "live channel connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<(), LiveChannelError> {
        let socket = self.socket.as_mut().ok_or(LiveChannelError::NotConnected)?;
        let frame = serde_json::to_string(&OutboundFrame { kind: "chat", chat: text })?;
        socket.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<ChatPayload> {
        loop {
            let socket = self.socket.as_mut()?;
            let next = socket.next().await;
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    warn!(error = %err, "live channel failed");
                    self.socket = None;
                    return None;
                }
                None => {
                    self.socket = None;
                    return None;
                }
            };

            match message {
                Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Inbound(payload)) => return Some(payload),
                    Ok(Frame::ChangeSocketId { .. }) => {}
                    Err(err) => debug!(error = %err, "ignoring unrecognized frame"),
                },
                Message::Close(_) => {
                    self.socket = None;
                    return None;
                }
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).await {
                debug!(error = %err, "live channel close failed");
            }
            debug!("live channel disconnected");
        }
    }
}
