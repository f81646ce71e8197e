//! Message accumulation for stream transports.
//!
//! TCP delivers bytes without message boundaries. A [`MessageBuffer`]
//! collects chunks until one message is available:
//!
//! - a structured payload (leading `{`) is complete once its outer braces
//!   balance and it parses, or fails with anything other than premature EOF;
//! - bare text, whitespace included, is complete once the stream goes quiet
//!   for [`MESSAGE_SETTLE`](crate::constants::MESSAGE_SETTLE);
//! - anything is complete when the peer half-closes.
//!
//! Each byte is scanned once; the buffer is only parsed when the braces
//! balance.

use crate::constants::MAX_MESSAGE_SIZE;
use crate::request::InvalidData;

/// Completeness of the buffered bytes after a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Nothing buffered yet, or a JSON object is still open.
    NeedMore,
    /// Bare text: complete unless more bytes arrive within the settle window.
    Settling,
    /// A full message is buffered.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Only whitespace so far.
    Blank,
    Text,
    /// JSON object starting at `start`.
    Object { start: usize },
}

/// Brace and string state of a structured payload, up to `pos`.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

/// Accumulates the bytes of a single inbound message.
#[derive(Debug)]
pub struct MessageBuffer {
    buf: Vec<u8>,
    limit: usize,
    shape: Shape,
    scan: Scan,
    framing: Framing,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_SIZE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            shape: Shape::Blank,
            scan: Scan::default(),
            framing: Framing::NeedMore,
        }
    }

    /// Appends a chunk and reports whether a message is available.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Framing, InvalidData> {
        let size = self.buf.len() + chunk.len();
        if size > self.limit {
            return Err(InvalidData::TooLarge {
                size,
                limit: self.limit,
            });
        }
        self.buf.extend_from_slice(chunk);
        self.framing = self.advance();
        Ok(self.framing)
    }

    /// Completeness of the current contents.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn advance(&mut self) -> Framing {
        if self.shape == Shape::Blank {
            let first = self.buf[self.scan.pos..]
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map(|offset| self.scan.pos + offset);
            match first {
                None if self.buf.is_empty() => return Framing::NeedMore,
                None => {
                    self.scan.pos = self.buf.len();
                    return Framing::Settling;
                }
                Some(start) if self.buf[start] == b'{' => {
                    self.shape = Shape::Object { start };
                    self.scan.pos = start;
                }
                Some(_) => self.shape = Shape::Text,
            }
        }

        let start = match self.shape {
            Shape::Object { start } => start,
            Shape::Blank | Shape::Text => return Framing::Settling,
        };

        while self.scan.pos < self.buf.len() {
            let byte = self.buf[self.scan.pos];
            self.scan.pos += 1;

            let scan = &mut self.scan;
            if scan.escaped {
                scan.escaped = false;
            } else if scan.in_string {
                match byte {
                    b'\\' => scan.escaped = true,
                    b'"' => scan.in_string = false,
                    _ => {}
                }
            } else {
                match byte {
                    b'"' => scan.in_string = true,
                    b'{' => scan.depth += 1,
                    b'}' => {
                        scan.depth = scan.depth.saturating_sub(1);
                        if scan.depth == 0 {
                            return parse_state(&self.buf[start..]);
                        }
                    }
                    _ => {}
                }
            }
        }
        Framing::NeedMore
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Takes the buffered message, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.shape = Shape::Blank;
        self.scan = Scan::default();
        self.framing = Framing::NeedMore;
        std::mem::take(&mut self.buf)
    }
}

fn parse_state(object: &[u8]) -> Framing {
    match serde_json::from_slice::<serde::de::IgnoredAny>(object) {
        Ok(_) => Framing::Complete,
        Err(e) if e.is_eof() => Framing::NeedMore,
        Err(_) => Framing::Complete,
    }
}
