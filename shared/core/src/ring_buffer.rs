//! Fixed-capacity circular buffer for the RF transmit/receive queues.
//! Single producer, single consumer; an oversized add clears the buffer and
//! reports failure rather than blocking the modem side.

use tracing::error;

pub struct RingBuffer<T: Copy + Default> {
    name: &'static str,
    buffer: Vec<T>,
    in_ptr: usize,
    out_ptr: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(length: usize, name: &'static str) -> Self {
        assert!(length > 0);
        Self {
            name,
            buffer: vec![T::default(); length],
            in_ptr: 0,
            out_ptr: 0,
        }
    }

    /// Appends `data`; on overflow the buffer is cleared and false returned.
    pub fn add_data(&mut self, data: &[T]) -> bool {
        if data.len() >= self.free_space() {
            error!(
                buffer = self.name,
                requested = data.len(),
                free = self.free_space(),
                "buffer overflow, clearing the buffer"
            );
            self.clear();
            return false;
        }

        for &item in data {
            self.buffer[self.in_ptr] = item;
            self.in_ptr += 1;
            if self.in_ptr == self.buffer.len() {
                self.in_ptr = 0;
            }
        }

        true
    }

    /// Pops `out.len()` items in FIFO order.
    pub fn get_data(&mut self, out: &mut [T]) -> bool {
        if self.data_size() < out.len() {
            error!(
                buffer = self.name,
                available = self.data_size(),
                requested = out.len(),
                "underflow in ring buffer"
            );
            return false;
        }

        for item in out.iter_mut() {
            *item = self.buffer[self.out_ptr];
            self.out_ptr += 1;
            if self.out_ptr == self.buffer.len() {
                self.out_ptr = 0;
            }
        }

        true
    }

    /// Reads without consuming.
    pub fn peek(&self, out: &mut [T]) -> bool {
        if self.data_size() < out.len() {
            return false;
        }

        let mut ptr = self.out_ptr;
        for item in out.iter_mut() {
            *item = self.buffer[ptr];
            ptr += 1;
            if ptr == self.buffer.len() {
                ptr = 0;
            }
        }

        true
    }

    pub fn clear(&mut self) {
        self.in_ptr = 0;
        self.out_ptr = 0;
        self.buffer.fill(T::default());
    }

    pub fn free_space(&self) -> usize {
        if self.out_ptr > self.in_ptr {
            self.out_ptr - self.in_ptr
        } else if self.in_ptr > self.out_ptr {
            self.buffer.len() - (self.in_ptr - self.out_ptr)
        } else {
            self.buffer.len()
        }
    }

    pub fn data_size(&self) -> usize {
        self.buffer.len() - self.free_space()
    }

    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_space(&self, length: usize) -> bool {
        self.free_space() > length
    }

    pub fn has_data(&self) -> bool {
        self.out_ptr != self.in_ptr
    }

    pub fn is_empty(&self) -> bool {
        self.out_ptr == self.in_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip() {
        let mut rb: RingBuffer<u8> = RingBuffer::new(16, "test");
        assert!(rb.add_data(&[1, 2, 3, 4, 5]));

        let mut out = [0u8; 5];
        assert!(rb.get_data(&mut out));
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert!(rb.is_empty());
    }

    #[test]
    fn wraps_around() {
        let mut rb: RingBuffer<u8> = RingBuffer::new(8, "test");
        let mut out = [0u8; 6];
        for round in 0..10u8 {
            let chunk = [round, round + 1, round + 2, round + 3, round + 4, round + 5];
            assert!(rb.add_data(&chunk));
            assert!(rb.get_data(&mut out));
            assert_eq!(out, chunk);
        }
    }

    #[test]
    fn overflow_clears_and_fails() {
        let mut rb: RingBuffer<u8> = RingBuffer::new(8, "test");
        assert!(rb.add_data(&[1, 2, 3, 4]));
        // free space is now 4; adding 4 more trips the overflow policy
        assert!(!rb.add_data(&[5, 6, 7, 8]));
        assert!(rb.is_empty());
        assert_eq!(rb.free_space(), 8);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut rb: RingBuffer<u8> = RingBuffer::new(8, "test");
        rb.add_data(&[9, 8, 7]);

        let mut out = [0u8; 3];
        assert!(rb.peek(&mut out));
        assert_eq!(out, [9, 8, 7]);
        assert_eq!(rb.data_size(), 3);
    }
}
