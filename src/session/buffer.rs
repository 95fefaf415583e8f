//! Bounded output history
//!
//! Keeps the most recent raw output chunks of a session for replay to newly
//! attached clients and as input to status detection and summaries.

use std::collections::VecDeque;

/// Default number of chunks retained per session
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

/// FIFO of output chunks with a fixed maximum chunk count
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    /// Create a buffer holding at most `capacity` chunks (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Maximum number of retained chunks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Append a chunk, evicting the oldest ones past capacity
    pub fn append(&mut self, chunk: impl Into<String>) {
        self.chunks.push_back(chunk.into());
        while self.chunks.len() > self.capacity {
            self.chunks.pop_front();
        }
    }

    /// All retained chunks concatenated in order
    pub fn snapshot(&self) -> String {
        let total = self.chunks.iter().map(String::len).sum();
        let mut out = String::with_capacity(total);
        for chunk in &self.chunks {
            out.push_str(chunk);
        }
        out
    }

    /// The last `n` chunks, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &str> {
        let skip = self.chunks.len().saturating_sub(n);
        self.chunks.iter().skip(skip).map(String::as_str)
    }

    /// The last `n` chunks concatenated
    pub fn recent_text(&self, n: usize) -> String {
        self.recent(n).collect()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
