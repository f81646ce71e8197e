//! Wire protocol for codesocket.
//!
//! A client sends one message per connection: a JSON object
//! `{"text": ..., "file": ...}` or a bare UTF-8 string. The server answers
//! with the raw UTF-8 output and closes the connection; the close marks the
//! end of the response.

pub mod constants;
pub mod events;
pub mod framing;
pub mod request;

pub use events::{Event, EventSink};
pub use framing::{Framing, MessageBuffer};
pub use request::{InvalidData, Request, decode};
