use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use std::ops::Range;

/// Default capacity of the rolling capture window.
pub const MAX_BUFFER_SIZE: usize = 1024;

/// Bounded rolling window over the raw bus byte stream.
///
/// The oldest bytes are evicted first when an append would exceed capacity,
/// so the window always holds the most recent `capacity` bytes.
#[derive(Debug)]
pub struct StreamBuffer {
    data: BytesMut,
    capacity: usize,
    total_appended: u64,
    total_evicted: u64,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Appends `bytes`, returning how many old bytes were evicted to make room.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        self.total_appended += bytes.len() as u64;

        let evicted = if bytes.len() >= self.capacity {
            // Only the tail of this chunk can survive
            let dropped = self.data.len() + bytes.len() - self.capacity;
            self.data.clear();
            self.data.extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            dropped
        } else {
            self.data.extend_from_slice(bytes);
            let excess = self.data.len().saturating_sub(self.capacity);
            if excess > 0 {
                self.data.advance(excess);
            }
            excess
        };

        if evicted > 0 {
            trace!("Buffer full, evicted {} oldest bytes", evicted);
            self.total_evicted += evicted as u64;
        }
        evicted
    }

    /// Removes and returns the first `n` bytes (fewer if the buffer is shorter).
    pub fn consume(&mut self, n: usize) -> Bytes {
        let n = n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Read-only view of `range`, clamped to the buffered bytes.
    pub fn peek(&self, range: Range<usize>) -> &[u8] {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        &self.data[start..end]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE)
    }
}
