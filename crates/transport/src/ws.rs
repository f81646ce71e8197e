//! WebSocket adapter: one text frame per message.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use codesocket_protocol::constants::MAX_MESSAGE_SIZE;

use crate::{Incoming, Transport, TransportError};

/// WebSocket limits matching the protocol's message cap.
fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

/// A WebSocket connection exchanging text frames.
pub struct WsTransport<S> {
    ws: WebSocketStream<S>,
    peer: String,
}

impl WsTransport<TcpStream> {
    /// Performs the server-side handshake on an accepted stream.
    pub async fn accept(
        stream: TcpStream,
        peer: std::net::SocketAddr,
    ) -> Result<Self, TransportError> {
        let ws = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config())).await?;
        tracing::debug!(%peer, "WebSocket handshake complete");
        Ok(Self {
            ws,
            peer: peer.to_string(),
        })
    }
}

impl WsTransport<MaybeTlsStream<TcpStream>> {
    /// Connects to `ws://{host}:{port}`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let url = format!("ws://{host}:{port}");
        let (ws, _) =
            tokio_tungstenite::connect_async_with_config(&url, Some(ws_config()), false).await?;
        tracing::debug!(%url, "WebSocket connected");
        Ok(Self { ws, peer: url })
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> String {
        self.peer.clone()
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            let frame = match self.ws.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => return Ok(Incoming::Closed),
                Some(Err(e)) => return Err(e.into()),
            };

            match frame {
                WsMessage::Text(text) => return Ok(Incoming::Message(text.as_bytes().to_vec())),
                WsMessage::Binary(data) => return Ok(Incoming::Message(data.to_vec())),
                WsMessage::Close(_) => return Ok(Incoming::Closed),
                // Pings are answered by tungstenite itself.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(data).into_owned();
        self.ws.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.ws.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
