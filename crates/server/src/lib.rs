//! codesocket server.
//!
//! A [`Listener`] binds one port and spawns a [`Connection`] per accepted
//! socket. Each connection reads exactly one request, runs it through the
//! execution controllers on the blocking pool, writes the output and
//! closes. Progress is reported through an
//! [`EventSink`](codesocket_protocol::EventSink).

mod connection;
mod listener;

pub use connection::{Connection, ConnectionOutcome, ConnectionState};
pub use listener::{Listener, ListenerConfig};

/// The listener could not bind its port.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind port {port}: {source}")]
pub struct BindError {
    pub port: u16,
    #[source]
    pub source: std::io::Error,
}

impl BindError {
    /// Human-readable cause, without the port.
    pub fn reason(&self) -> String {
        self.source.to_string()
    }
}
