//! One request/response exchange on an accepted socket.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use codesocket_controllers::{ExecutionContext, ExecutionError};
use codesocket_protocol::constants::{MAX_MESSAGE_SIZE, MESSAGE_SETTLE};
use codesocket_protocol::{Event, EventSink, Framing, InvalidData, MessageBuffer, decode};
use codesocket_timer::{TimeoutExpired, Timer};
use codesocket_transport::{Incoming, Transport, TransportError};

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Open,
    AwaitingMessage,
    Processing,
    Responding,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::AwaitingMessage => "awaiting message",
            Self::Processing => "processing",
            Self::Responding => "responding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Output (possibly an error rendering) was written to the peer.
    Responded,
    /// The message could not be decoded; nothing was written.
    InvalidData,
    /// No complete message arrived before the socket timeout.
    TimedOut,
    /// The peer closed before sending anything.
    PeerClosed,
    /// The socket failed.
    TransportError,
}

/// Why receiving stopped without a message.
enum Interrupt {
    TimedOut(TimeoutExpired),
    PeerClosed,
    Invalid(InvalidData),
    Transport(TransportError),
}

/// Handles a single socket from accept to close.
pub struct Connection<T: Transport> {
    transport: T,
    peer: String,
    state: ConnectionState,
    timer: Timer,
    buffer: MessageBuffer,
    ctx: ExecutionContext,
    events: EventSink,
}

impl<T: Transport> Connection<T> {
    /// Wraps a connected transport. A zero `socket_timeout` waits forever.
    pub fn new(
        transport: T,
        ctx: ExecutionContext,
        events: EventSink,
        socket_timeout: Duration,
    ) -> Self {
        let tick_events = events.clone();
        let timer = Timer::with_ticks(
            "socket",
            socket_timeout,
            Box::new(move |remaining| tick_events.emit(Event::SocketTimeout(remaining))),
        );

        Self {
            peer: transport.peer(),
            transport,
            state: ConnectionState::Open,
            timer,
            buffer: MessageBuffer::new(),
            ctx,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(peer = %self.peer, from = %self.state, to = %next, "connection state");
        self.state = next;
    }

    /// Runs the exchange to completion.
    pub async fn run(mut self) -> ConnectionOutcome {
        self.transition(ConnectionState::AwaitingMessage);
        self.timer.start();

        let raw = match self.receive().await {
            Ok(raw) => raw,
            Err(interrupt) => return self.abort(interrupt).await,
        };
        self.timer.stop();

        self.transition(ConnectionState::Processing);
        self.events
            .emit(Event::MessageReceived(String::from_utf8_lossy(&raw).into_owned()));

        let request = match decode(&raw) {
            Ok(request) => request,
            Err(e) => return self.abort(Interrupt::Invalid(e)).await,
        };

        let ctx = self.ctx.clone();
        let output = match tokio::task::spawn_blocking(move || ctx.process(&request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(peer = %self.peer, "execution failed: {e}");
                e.render()
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    "execution cancelled".to_string()
                };
                tracing::error!(peer = %self.peer, "execution aborted: {reason}");
                ExecutionError::Panicked(reason).render()
            }
        };

        self.transition(ConnectionState::Responding);
        if let Err(e) = self.respond(&output).await {
            return self.abort(Interrupt::Transport(e)).await;
        }

        self.transition(ConnectionState::Closed);
        tracing::info!(peer = %self.peer, bytes = output.len(), "response sent");
        self.events.emit(Event::OutputProduced(output));
        ConnectionOutcome::Responded
    }

    async fn respond(&mut self, output: &str) -> Result<(), TransportError> {
        self.transport.send(output.as_bytes()).await?;
        self.transport.close().await
    }

    /// Reads until one complete message is buffered.
    async fn receive(&mut self) -> Result<Vec<u8>, Interrupt> {
        let mut settle: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.timer.expired() => return Err(Interrupt::TimedOut(self.timer.expiry())),

                _ = settle_elapsed(settle) => return Ok(self.buffer.take()),

                incoming = self.transport.recv() => {
                    match incoming.map_err(Interrupt::Transport)? {
                        Incoming::Chunk(chunk) => {
                            self.timer.reset();
                            match self.buffer.push(&chunk).map_err(Interrupt::Invalid)? {
                                Framing::Complete => return Ok(self.buffer.take()),
                                Framing::Settling => settle = Some(Instant::now() + MESSAGE_SETTLE),
                                Framing::NeedMore => settle = None,
                            }
                        }
                        Incoming::Message(message) => {
                            if message.len() > MAX_MESSAGE_SIZE {
                                return Err(Interrupt::Invalid(InvalidData::TooLarge {
                                    size: message.len(),
                                    limit: MAX_MESSAGE_SIZE,
                                }));
                            }
                            return Ok(message);
                        }
                        Incoming::Closed if self.buffer.is_empty() => {
                            return Err(Interrupt::PeerClosed);
                        }
                        Incoming::Closed => return Ok(self.buffer.take()),
                    }
                }
            }
        }
    }

    /// Closes the socket without a response and reports why.
    async fn abort(mut self, interrupt: Interrupt) -> ConnectionOutcome {
        self.timer.stop();

        let outcome = match interrupt {
            Interrupt::TimedOut(e) => {
                tracing::info!(peer = %self.peer, "{e}, closing");
                self.events
                    .state_changed(format!("timeout: no message from {}", self.peer));
                ConnectionOutcome::TimedOut
            }
            Interrupt::PeerClosed => {
                tracing::debug!(peer = %self.peer, "peer closed without sending data");
                self.events
                    .state_changed(format!("{} disconnected", self.peer));
                ConnectionOutcome::PeerClosed
            }
            Interrupt::Invalid(e) => {
                tracing::warn!(peer = %self.peer, "invalid data: {e}");
                self.events.state_changed(format!("invalid data: {e}"));
                ConnectionOutcome::InvalidData
            }
            Interrupt::Transport(e) => {
                tracing::warn!(peer = %self.peer, state = %self.state, "transport error: {e}");
                self.events.state_changed(format!("error: {e}"));
                ConnectionOutcome::TransportError
            }
        };

        if outcome != ConnectionOutcome::TransportError {
            if let Err(e) = self.transport.close().await {
                tracing::debug!(peer = %self.peer, "close failed: {e}");
            }
        }
        self.transition(ConnectionState::Closed);
        outcome
    }
}

async fn settle_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "execution panicked".to_string()
    }
}
