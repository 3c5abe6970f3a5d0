//! WebSocket transport.
//!
//! Each frame is one text message. Binary messages are accepted inbound and
//! handed to the frame decoder as-is. WebSocket-level ping/pong is answered by
//! tungstenite; the session runs its own `ping`/`pong` heartbeat on top.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::transport::{Transport, TransportError};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport.
#[derive(Default)]
pub struct WebSocketTransport {
    stream: Option<Stream>,
}

impl WebSocketTransport {
    /// Create a closed transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport").field("open", &self.stream.is_some()).finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.close().await;

        let (stream, response) =
            connect_async(endpoint).await.map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(endpoint, status = %response.status(), "websocket open");

        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.send(Message::Text(text.into())).await.map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            let next = self.stream.as_mut()?.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(bytes))) => return Some(Ok(bytes.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    self.stream = None;
                    return None;
                },
                Some(Err(e)) => return Some(Err(TransportError::Receive(e.to_string()))),
                None => {
                    self.stream = None;
                    return None;
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.close(None).await
        {
            tracing::debug!(error = %e, "websocket close");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
