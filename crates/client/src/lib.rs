//! Outbound client.
//!
//! Connects, writes one request, signals end of message and reads until
//! the listener closes the connection. The whole round trip is bounded by
//! a [`Timer`] that reports remaining seconds as
//! [`Event::ClientTimeout`].

use std::path::Path;
use std::time::Duration;

use codesocket_protocol::constants::{DEFAULT_CLIENT_TIMEOUT, DEFAULT_PORT};
use codesocket_protocol::{Event, EventSink, InvalidData, Request};
use codesocket_timer::{TimeoutExpired, Timer};
use codesocket_transport::{
    Incoming, TcpTransport, Transport, TransportError, TransportKind, WsTransport,
};

/// Code sent by [`Client::test`].
pub const SELF_TEST_TEXT: &str = "print(\"Hello from codesocket test client\")";

/// File hint sent by [`Client::test`].
pub const SELF_TEST_FILE: &str = "codesocket_test.py";

/// Errors returned to callers of the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no response: {0}")]
    Timeout(#[from] TimeoutExpired),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidData),
}

/// Where and how the client connects.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    /// Round-trip deadline (zero = wait forever).
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }
}

/// Sends requests to a listener, one connection per request.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    events: EventSink,
}

impl Client {
    pub fn new(config: ClientConfig, events: EventSink) -> Self {
        Self { config, events }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends the built-in self-test request.
    pub async fn test(&self) -> Result<String, ClientError> {
        let request = Request::new(SELF_TEST_TEXT, SELF_TEST_FILE)?;
        self.send(&request).await
    }

    /// Reads `path` and sends its contents with `file` set to the path.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<String, ClientError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let request = Request::new(text, path.to_string_lossy())?;
        self.send(&request).await
    }

    pub async fn send(&self, request: &Request) -> Result<String, ClientError> {
        self.send_raw(request.to_wire().as_bytes()).await
    }

    /// Sends `payload` verbatim and returns the response text.
    pub async fn send_raw(&self, payload: &[u8]) -> Result<String, ClientError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let tick_events = self.events.clone();
        let timer = Timer::with_ticks(
            "client",
            self.config.timeout,
            Box::new(move |remaining| tick_events.emit(Event::ClientTimeout(remaining))),
        );

        self.events.state_changed(format!("connecting to {target}"));
        tracing::debug!(
            %target,
            kind = %self.config.transport,
            bytes = payload.len(),
            "sending request"
        );
        timer.start();

        let result = tokio::select! {
            biased;
            _ = timer.expired() => Err(ClientError::Timeout(timer.expiry())),
            result = self.exchange(payload) => result.map_err(ClientError::from),
        };
        timer.stop();

        match &result {
            Ok(response) => {
                tracing::info!(%target, bytes = response.len(), "response received");
                self.events.state_changed(format!("response received from {target}"));
            }
            Err(ClientError::Timeout(_)) => {
                tracing::warn!(%target, "client timeout");
                self.events
                    .state_changed(format!("timeout: no response from {target}"));
            }
            Err(e) => {
                tracing::warn!(%target, "request failed: {e}");
                self.events.state_changed(format!("error: {e}"));
            }
        }
        result
    }

    async fn exchange(&self, payload: &[u8]) -> Result<String, TransportError> {
        match self.config.transport {
            TransportKind::Tcp => {
                let transport =
                    TcpTransport::connect((self.config.host.as_str(), self.config.port)).await?;
                round_trip(transport, payload).await
            }
            TransportKind::WebSocket => {
                let transport = WsTransport::connect(&self.config.host, self.config.port).await?;
                round_trip(transport, payload).await
            }
        }
    }
}

async fn round_trip<T: Transport>(
    mut transport: T,
    payload: &[u8],
) -> Result<String, TransportError> {
    transport.send(payload).await?;
    transport.finish().await?;

    let mut response = Vec::new();
    loop {
        match transport.recv().await? {
            Incoming::Chunk(chunk) | Incoming::Message(chunk) => response.extend_from_slice(&chunk),
            Incoming::Closed => break,
        }
    }
    if let Err(e) = transport.close().await {
        tracing::debug!(peer = %transport.peer(), "close after response failed: {e}");
    }

    Ok(String::from_utf8_lossy(&response).into_owned())
}
