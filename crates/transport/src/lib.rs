//! Transport adapters.
//!
//! The server and client speak the same protocol over either raw TCP or
//! WebSocket text frames. Both are exposed through the [`Transport`] trait;
//! the concrete adapter is chosen once from [`TransportKind`] when a
//! listener or client is built and never branched on per call.

mod tcp;
mod ws;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

pub use tcp::TcpTransport;
pub use ws::WsTransport;

/// Errors produced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Which adapter a listener or client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    #[serde(alias = "ws")]
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::WebSocket => f.write_str("websocket"),
        }
    }
}

/// Data read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Bytes from a stream with no message boundaries (TCP).
    Chunk(Vec<u8>),
    /// One whole message (a WebSocket frame).
    Message(Vec<u8>),
    /// The peer closed its side.
    Closed,
}

/// A connected, transport-agnostic socket.
pub trait Transport: Send + 'static {
    /// Human-readable identifier of the remote end.
    fn peer(&self) -> String;

    /// Waits for the next chunk or message.
    fn recv(&mut self) -> impl Future<Output = Result<Incoming, TransportError>> + Send;

    /// Writes `data` and flushes it.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Marks the end of the outbound message while keeping the inbound
    /// side open (TCP half-close; no-op for self-delimiting frames).
    fn finish(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection. Best effort: a peer that is already gone is
    /// not an error.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
