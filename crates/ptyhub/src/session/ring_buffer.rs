//! Fixed-capacity FIFO byte buffer.
//!
//! Used for output scrollback (replayed to viewers that attach late) and for
//! queueing input until the input pump flushes it to the process. Appending
//! past capacity evicts the oldest bytes.

/// A fixed-capacity circular byte buffer.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    /// Position of the oldest byte.
    head: usize,
    /// Number of valid bytes.
    len: usize,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            head: 0,
            len: 0,
        }
    }

    /// Append data, evicting the oldest bytes if the buffer overflows.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 || data.is_empty() {
            return;
        }

        // Only the trailing `capacity` bytes can survive.
        let data = &data[data.len().saturating_sub(self.capacity)..];

        let overflow = (self.len + data.len()).saturating_sub(self.capacity);
        self.head = (self.head + overflow) % self.capacity;
        self.len -= overflow;

        let tail = (self.head + self.len) % self.capacity;
        let first = data.len().min(self.capacity - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        let rest = &data[first..];
        self.buf[..rest.len()].copy_from_slice(rest);
        self.len += data.len();
    }

    /// Read all buffered data in chronological order.
    pub fn read_all(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.len);
        let first = self.len.min(self.capacity - self.head);
        result.extend_from_slice(&self.buf[self.head..self.head + first]);
        result.extend_from_slice(&self.buf[..self.len - first]);
        result
    }

    /// Remove and return all buffered data, oldest first.
    pub fn drain_all(&mut self) -> Vec<u8> {
        let data = self.read_all();
        self.head = 0;
        self.len = 0;
        data
    }

    /// Number of valid bytes currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all buffered data.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let mut rb = RingBuffer::new(10);
        rb.write(b"hello");
        assert_eq!(rb.read_all(), b"hello");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn wrap_around() {
        let mut rb = RingBuffer::new(5);
        rb.write(b"abcde"); // fills exactly
        rb.write(b"fg"); // overwrites a, b
        assert_eq!(rb.read_all(), b"cdefg");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"xy");
        rb.write(b"0123456789");
        assert_eq!(rb.read_all(), b"6789");
        assert_eq!(rb.len(), 4);
    }

    #[test]
    fn fifo_eviction_matches_last_bytes() {
        let capacity = 7;
        let mut rb = RingBuffer::new(capacity);
        let mut appended = Vec::new();
        for (i, chunk) in [&b"ab"[..], b"cdefg", b"h", b"ijklmnopq", b"rs", b"t"]
            .iter()
            .enumerate()
        {
            rb.write(chunk);
            appended.extend_from_slice(chunk);
            let expected = &appended[appended.len().saturating_sub(capacity)..];
            assert_eq!(rb.read_all(), expected, "after append {i}");
            assert!(rb.len() <= capacity);
        }
        assert_eq!(rb.len(), capacity);
    }

    #[test]
    fn clear_then_write() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"abcdef");
        rb.clear();
        assert!(rb.is_empty());
        rb.write(b"zz");
        assert_eq!(rb.read_all(), b"zz");
    }

    #[test]
    fn drain_empties_in_order() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"abc");
        rb.write(b"de");
        assert_eq!(rb.drain_all(), b"bcde");
        assert!(rb.is_empty());
        assert_eq!(rb.drain_all(), Vec::<u8>::new());
    }

    #[test]
    fn empty_buffer() {
        let rb = RingBuffer::new(10);
        assert!(rb.is_empty());
        assert_eq!(rb.read_all(), Vec::<u8>::new());
    }

    #[test]
    fn zero_capacity() {
        let mut rb = RingBuffer::new(0);
        rb.write(b"test");
        assert!(rb.is_empty());
        assert_eq!(rb.read_all(), Vec::<u8>::new());
    }
}
