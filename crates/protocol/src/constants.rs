//! Protocol-wide defaults and limits.

use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 54321;

/// Default idle time after which the listener reports a server timeout.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default client round-trip deadline.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-socket deadline for receiving a complete message.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest inbound message accepted on any transport (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Quiet period after which buffered bare text is treated as complete.
pub const MESSAGE_SETTLE: Duration = Duration::from_millis(50);

/// Byte capacity of the shared output history.
pub const HISTORY_CAPACITY: usize = 1_000_000;
