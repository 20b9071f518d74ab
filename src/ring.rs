//! Bounded FIFOs between transport producers and session consumers.
//!
//! Two shapes are provided:
//!
//! - [`ByteRing`] - stream semantics for byte-oriented transports (serial).
//! - [`MessageRing`] - message semantics for transports where one received
//!   chunk is one message (loopback, UDP-style).
//!
//! Both are safe for one producer and one consumer running concurrently.
//! A short critical section guards each operation; no lock-free contract
//! is offered. Neither ring silently drops data: `write` reports the count
//! accepted and `enqueue` refuses when full, so callers surface
//! back-pressure on short writes.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use bytes::Bytes;

/// Fixed-capacity ring buffer over bytes.
///
/// Capacity is rounded up to a power of two so wrap-around reduces to a
/// mask. Head and tail are monotonically increasing counters; their
/// difference is the fill level.
pub struct ByteRing {
    inner: Mutex<ByteRingInner>,
    capacity: usize,
}

struct ByteRingInner {
    buffer: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl ByteRing {
    /// Create a ring with at least `capacity` bytes of space.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            inner: Mutex::new(ByteRingInner {
                buffer: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
            capacity,
        }
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently available for reading.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.head - inner.tail
    }

    /// Space currently available for writing.
    pub fn available(&self) -> usize {
        self.capacity - self.len()
    }

    /// True if no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if no space remains.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Write bytes, returning the count accepted (may be short when full).
    pub fn write(&self, data: &[u8]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mask = self.capacity - 1;
        let space = self.capacity - (inner.head - inner.tail);
        let to_write = data.len().min(space);
        if to_write == 0 {
            return 0;
        }

        let head_index = inner.head & mask;
        let first = to_write.min(self.capacity - head_index);
        inner.buffer[head_index..head_index + first].copy_from_slice(&data[..first]);
        if first < to_write {
            inner.buffer[..to_write - first].copy_from_slice(&data[first..to_write]);
        }

        inner.head += to_write;
        to_write
    }

    /// Read bytes into `out`, returning the count copied.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let copied = Self::copy_out(&inner, out, self.capacity);
        inner.tail += copied;
        copied
    }

    /// Copy bytes into `out` without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let inner = self.inner.lock().unwrap();
        Self::copy_out(&inner, out, self.capacity)
    }

    /// Discard all buffered bytes.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tail = inner.head;
    }

    fn copy_out(inner: &ByteRingInner, out: &mut [u8], capacity: usize) -> usize {
        let mask = capacity - 1;
        let filled = inner.head - inner.tail;
        let to_read = out.len().min(filled);
        if to_read == 0 {
            return 0;
        }

        let tail_index = inner.tail & mask;
        let first = to_read.min(capacity - tail_index);
        out[..first].copy_from_slice(&inner.buffer[tail_index..tail_index + first]);
        if first < to_read {
            out[first..to_read].copy_from_slice(&inner.buffer[..to_read - first]);
        }
        to_read
    }
}

/// Bounded FIFO of complete messages.
///
/// Each entry is one transport chunk; boundaries are preserved. `enqueue`
/// refuses when the ring is full so the producer can propagate a
/// rate-limit error instead of overwriting.
pub struct MessageRing {
    inner: Mutex<VecDeque<Bytes>>,
    available: Condvar,
    capacity: usize,
}

impl MessageRing {
    /// Create a ring holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True if no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the ring is at capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Total bytes across all queued messages.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().iter().map(Bytes::len).sum()
    }

    /// Enqueue a message. Returns false without queuing when full.
    pub fn enqueue(&self, message: Bytes) -> bool {
        {
            let mut queue = self.inner.lock().unwrap();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(message);
        }
        self.available.notify_one();
        true
    }

    /// Dequeue the oldest message, if any.
    pub fn dequeue(&self) -> Option<Bytes> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Dequeue the oldest message, blocking up to `timeout` for one to
    /// arrive.
    pub fn dequeue_wait(&self, timeout: Duration) -> Option<Bytes> {
        let queue = self.inner.lock().unwrap();
        let (mut queue, _) = self
            .available
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        queue.pop_front()
    }

    /// Discard all queued messages.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}
