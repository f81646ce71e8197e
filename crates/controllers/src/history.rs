//! Size-capped output history shared by all connections.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use codesocket_protocol::constants::HISTORY_CAPACITY;

/// Ordered log of rendered outputs, bounded by total entry bytes.
///
/// The oldest entries are evicted first. A single entry larger than the
/// capacity is cut down to its trailing bytes.
#[derive(Debug)]
pub struct OutputHistory {
    capacity: usize,
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    items: VecDeque<String>,
    bytes: usize,
}

impl Default for OutputHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Entries::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, entry: impl Into<String>) {
        let entry = tail_within(entry.into(), self.capacity);
        let mut inner = self.lock();

        while inner.bytes + entry.len() > self.capacity {
            match inner.items.pop_front() {
                Some(evicted) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
        inner.bytes += entry.len();
        inner.items.push_back(entry);
    }

    /// All entries, oldest first, one per line.
    pub fn render(&self) -> String {
        let inner = self.lock();
        let mut out = String::with_capacity(inner.bytes + inner.items.len());
        for (i, item) in inner.items.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(item);
        }
        out
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.bytes = 0;
    }

    /// Total bytes held by entries.
    pub fn len_bytes(&self) -> usize {
        self.lock().bytes
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Keeps the last `limit` bytes of `entry`, moved forward to a char boundary.
fn tail_within(entry: String, limit: usize) -> String {
    if entry.len() <= limit {
        return entry;
    }
    let mut start = entry.len() - limit;
    while !entry.is_char_boundary(start) {
        start += 1;
    }
    entry[start..].to_string()
}
