//! Notifications emitted by the core for the presentation layer.

use tokio::sync::mpsc;

/// Capacity of the notification channel.
///
/// Timers tick once per second per open connection, so a UI that stalls for
/// a few seconds should not lose lifecycle events.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// A named notification.
///
/// Timeout variants carry the remaining whole seconds; `0` means the
/// deadline expired and the governed resource was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged(String),
    MessageReceived(String),
    OutputProduced(String),
    ClientTimeout(u64),
    ServerTimeout(u64),
    SocketTimeout(u64),
}

impl Event {
    /// Stable notification name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state_changed",
            Self::MessageReceived(_) => "message_received",
            Self::OutputProduced(_) => "output_produced",
            Self::ClientTimeout(_) => "client_timeout",
            Self::ServerTimeout(_) => "server_timeout",
            Self::SocketTimeout(_) => "socket_timeout",
        }
    }

    /// Returns `true` for a timeout notification reporting expiry.
    pub fn is_expiry(&self) -> bool {
        matches!(
            self,
            Self::ClientTimeout(0) | Self::ServerTimeout(0) | Self::SocketTimeout(0)
        )
    }
}

/// Non-blocking handle for emitting [`Event`]s.
///
/// Cloneable and cheap. Emitting never waits: when the receiver is gone the
/// event is discarded, when it is full the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<Event>>,
}

impl EventSink {
    /// Creates a sink and the receiver the UI layer drains.
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: Event) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
            tracing::warn!(event = event.name(), "event buffer full, dropping notification");
        }
    }

    pub fn state_changed(&self, text: impl Into<String>) {
        self.emit(Event::StateChanged(text.into()));
    }
}
