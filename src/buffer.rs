//! Byte staging for the record layer.
//!
//! A single datagram read can deliver several records. The surplus is staged
//! in a [`ByteQueue`] and drained record by record before the transport is
//! touched again.

/// Growable byte ring buffer.
#[derive(Default)]
pub(crate) struct ByteQueue {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently queued.
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append bytes to the tail of the queue, growing the ring if needed.
    pub fn add_data(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        let cap = self.data.len();
        let mut tail = (self.head + self.len) % cap;
        for &b in bytes {
            self.data[tail] = b;
            tail = (tail + 1) % cap;
        }
        self.len += bytes.len();
    }

    /// Copy `out.len()` bytes starting at `offset` without consuming them.
    ///
    /// Panics if the requested range is not available; callers check
    /// `available()` first.
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.len);
        let cap = self.data.len();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.data[(self.head + offset + i) % cap];
        }
    }

    /// Peek a big-endian u16 at `offset`.
    pub fn read_u16(&self, offset: usize) -> u16 {
        let mut bytes = [0u8; 2];
        self.read(offset, &mut bytes);
        u16::from_be_bytes(bytes)
    }

    /// Drop `count` bytes from the head of the queue.
    pub fn remove_data(&mut self, count: usize) {
        assert!(count <= self.len);
        if self.data.is_empty() {
            return;
        }
        self.head = (self.head + count) % self.data.len();
        self.len -= count;
        if self.len == 0 {
            self.head = 0;
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn reserve(&mut self, extra: usize) {
        let needed = self.len + extra;
        if needed <= self.data.len() {
            return;
        }
        // Re-linearize into a larger backing vector.
        let new_cap = needed.next_power_of_two().max(512);
        let mut fresh = vec![0u8; new_cap];
        let mut linear = vec![0u8; self.len];
        self.read(0, &mut linear);
        fresh[..self.len].copy_from_slice(&linear);
        self.data = fresh;
        self.head = 0;
    }
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteQueue")
            .field("available", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_read_remove() {
        let mut q = ByteQueue::new();
        assert!(q.is_empty());

        q.add_data(&[1, 2, 3, 4, 5]);
        assert_eq!(q.available(), 5);
        assert_eq!(q.read_u16(1), 0x0203);

        let mut out = [0u8; 2];
        q.read(3, &mut out);
        assert_eq!(out, [4, 5]);

        q.remove_data(2);
        assert_eq!(q.available(), 3);
        assert_eq!(q.read_u16(0), 0x0304);
    }

    #[test]
    fn wraps_around_after_removal() {
        let mut q = ByteQueue::new();
        // Fill past the initial capacity in chunks with interleaved removal
        // so head moves away from zero and data wraps.
        q.add_data(&[0u8; 500]);
        q.remove_data(400);

        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        q.add_data(&payload);
        assert_eq!(q.available(), 100 + 600);

        q.remove_data(100);
        let mut out = vec![0u8; 600];
        q.read(0, &mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut q = ByteQueue::new();
        q.add_data(&[9, 8, 7]);
        q.clear();
        assert!(q.is_empty());

        q.add_data(&[1, 2]);
        assert_eq!(q.read_u16(0), 0x0102);
    }
}
